//! Storybook data types.

use crate::image_ref::ImageRef;

/// One finished page: an illustration and its caption.
///
/// Pages are produced once and never mutated; a storybook is a `Vec` of them
/// in narrative order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryPage {
    pub image: ImageRef,
    pub story: String,
}

impl StoryPage {
    pub fn new(image: ImageRef, story: impl Into<String>) -> Self {
        Self {
            image,
            story: story.into(),
        }
    }
}

/// How a page's illustration is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    /// Ask the image model. With `include_avatar` the avatar is attached
    /// before the prompt text; without it the page is purely text-driven.
    Generate {
        prompt: String,
        include_avatar: bool,
    },
    /// A pre-baked illustration; no network call is made for this page.
    Static(ImageRef),
}

/// A planned page: caption plus illustration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub story: String,
    pub source: PageSource,
}

impl PagePlan {
    pub fn generated(story: impl Into<String>, prompt: impl Into<String>, include_avatar: bool) -> Self {
        Self {
            story: story.into(),
            source: PageSource::Generate {
                prompt: prompt.into(),
                include_avatar,
            },
        }
    }

    pub fn fixed(story: impl Into<String>, image: ImageRef) -> Self {
        Self {
            story: story.into(),
            source: PageSource::Static(image),
        }
    }

    /// True if this page needs a network call.
    pub fn needs_generation(&self) -> bool {
        matches!(self.source, PageSource::Generate { .. })
    }
}
