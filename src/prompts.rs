//! Prompts and the built-in story script.
//!
//! All prompt text lives here so it can be changed, and unit-tested, without
//! touching request or error-handling logic.

use crate::story::PagePlan;

/// Instruction sent with the user's photo in the avatar phase.
pub const AVATAR_PROMPT: &str = "将此真人头像转换为一只可爱的小青龙形象的奇幻水彩漫画风格插画。请高度保留上传头像的脸部特征和辨识度，但将其风格化为柔和的色彩、蓬松的头发和富有表现力的眼睛。角色应穿着或融入小青龙的元素，具有日本奇幻动画角色设计风格，类似于儿童奇幻插画";

/// Instruction sent with the avatar when the script is authored by the LLM.
pub const STORY_AUTHOR_PROMPT: &str = "为这个角色创作一个四页的中文儿童冒险故事。故事要简单、温馨、有想象力。请以 JSON 格式返回，包含四页的内容，每一页都有 'story_text'（故事文本）和 'image_prompt'（用于生成图片的英文提示，描述场景和角色动作）。";

/// Appended to every authored image prompt.
pub const AUTHORED_STYLE_SUFFIX: &str =
    ". Style should be a vibrant, friendly, and cute children's storybook illustration.";

const STYLE: &str = "A fantasy watercolor manga style illustration.";

/// The fixed four-page "Dragon Legion" script.
///
/// Page 3 is text-driven: the avatar is not attached to its request.
pub fn builtin_script() -> Vec<PagePlan> {
    vec![
        PagePlan::generated(
            "山洪与飓风，暴雨与海水席卷这里 ！ 我...我一个人快顶不住了！",
            format!(
                "{STYLE} In the sky of ancient Longgang, there are dark clouds, thunder, and lightning. \
                 Below is a stormy sea with a huge hurricane approaching simple thatched houses. \
                 A cute little green dragon (user's avatar) is seen from the back, looking small and \
                 helpless against the massive storm, creating a strong sense of oppression."
            ),
            true,
        ),
        PagePlan::generated(
            "我需要支援！十万火急！",
            format!(
                "{STYLE} Close-up on the cute little green dragon (user's avatar) in the storm. \
                 It has a determined look, raising both hands towards the sky. A firm beam of light \
                 shoots from its hands, connecting to a swirling space-time vortex in the sky."
            ),
            true,
        ),
        PagePlan::generated(
            "收到！‘龙之军团’正在从纸上‘活’过来！米塑龙、竹子龙、烫金龙、像素龙…全体出动！",
            format!(
                "{STYLE} Inside a modern, clean, high-tech 'China Printing City' factory. A huge, \
                 futuristic printing press is running at high speed. Thousands of pieces of paper, \
                 each with a different dragon printed on it, are flying out of the machine and into \
                 a rift in the sky."
            ),
            false,
        ),
        PagePlan::generated(
            "哇！我不是一个人在战斗！兄弟们，冲啊！",
            format!(
                "{STYLE} The cute little green dragon (user's avatar) is no longer alone. It \
                 confidently leads a diverse 'Dragon Legion' of dragons that have come to life from \
                 paper flying out of a sky rift. Villagers on both sides watch with joy. The storm \
                 is receding and the sky is clearing."
            ),
            true,
        ),
    ]
}

/// Build the image prompt for an authored page.
pub fn authored_image_prompt(image_prompt: &str) -> String {
    format!("{}{}", image_prompt.trim_end_matches('.'), AUTHORED_STYLE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::PageSource;

    #[test]
    fn builtin_script_has_four_pages_in_order() {
        let script = builtin_script();
        assert_eq!(script.len(), 4);
        assert_eq!(script[1].story, "我需要支援！十万火急！");
        assert!(script.iter().all(PagePlan::needs_generation));
    }

    #[test]
    fn only_page_three_skips_avatar() {
        let flags: Vec<bool> = builtin_script()
            .iter()
            .map(|p| match &p.source {
                PageSource::Generate { include_avatar, .. } => *include_avatar,
                PageSource::Static(_) => false,
            })
            .collect();
        assert_eq!(flags, vec![true, true, false, true]);
    }

    #[test]
    fn authored_prompt_gets_style_suffix_once() {
        let p = authored_image_prompt("A dragon flies over the sea.");
        assert_eq!(
            p,
            "A dragon flies over the sea. Style should be a vibrant, friendly, and cute children's storybook illustration."
        );
    }
}
