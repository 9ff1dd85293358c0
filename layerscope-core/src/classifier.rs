//! Call-site attribution for captured stack traces.
//!
//! A trace is a header line, the hook's own frame, then caller frames. Each
//! frame line is tried against an ordered list of layouts; frames whose file
//! sits under an instrumentation URL scheme are told apart from the caller's
//! own code.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// URL scheme prefixes that mark a frame as injected instrumentation.
pub const DEFAULT_INSTRUMENTATION_PREFIXES: &[&str] = &[
    "chrome-extension://",
    "moz-extension://",
    "safari-web-extension://",
    "safari-extension://",
];

/// Header line plus the hook's own frame.
const SKIPPED_LINES: usize = 2;

const UNKNOWN_FILE: &str = "unknown";

/// One parsed stack frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub function: Option<String>,
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Line index within the raw stack text.
    pub index: usize,
    pub instrumentation: bool,
}

/// Where an append call came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub function: Option<String>,
    pub raw_stack: String,
    /// Line index of the highlighted frame; `None` for the unknown sentinel.
    pub frame_index: Option<usize>,
    pub has_instrumentation_frames: bool,
    /// The very first parsed frame, when it is not the highlighted one.
    pub via_intermediate: Option<Frame>,
}

impl Origin {
    pub fn unknown(raw_stack: impl Into<String>) -> Self {
        Origin {
            file: UNKNOWN_FILE.to_string(),
            line: 0,
            column: 0,
            function: None,
            raw_stack: raw_stack.into(),
            frame_index: None,
            has_instrumentation_frames: false,
            via_intermediate: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.frame_index.is_none() && self.file == UNKNOWN_FILE
    }

    fn from_frame(frame: &Frame, raw_stack: &str) -> Self {
        Origin {
            file: frame.file.clone(),
            line: frame.line,
            column: frame.column,
            function: frame.function.clone(),
            raw_stack: raw_stack.to_string(),
            frame_index: Some(frame.index),
            has_instrumentation_frames: false,
            via_intermediate: None,
        }
    }
}

/// Textual frame layouts, tried in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameLayout {
    /// `    at name (file:line:column)` or `    at file:line:column`
    Paren,
    /// `name@file:line:column`, name may be empty
    At,
}

impl FrameLayout {
    pub const ALL: [FrameLayout; 2] = [FrameLayout::Paren, FrameLayout::At];

    fn pattern(self) -> &'static Regex {
        static PAREN: OnceLock<Regex> = OnceLock::new();
        static AT: OnceLock<Regex> = OnceLock::new();
        match self {
            FrameLayout::Paren => PAREN.get_or_init(|| {
                Regex::new(r"^\s*at\s+(?:(?P<func>.+?)\s+\((?P<loc>.+)\)|(?P<bare>\S+))\s*$")
                    .expect("static frame pattern")
            }),
            FrameLayout::At => AT.get_or_init(|| {
                Regex::new(r"^\s*(?P<func>[^@\s]*)@(?P<loc>\S+)\s*$").expect("static frame pattern")
            }),
        }
    }

    /// Parse one line into `(function, file, line, column)`.
    pub fn parse(self, text: &str) -> Option<(Option<String>, String, u32, u32)> {
        let caps = self.pattern().captures(text)?;
        let location = caps
            .name("loc")
            .or_else(|| caps.name("bare"))
            .map(|m| m.as_str())?;
        let (file, line, column) = split_location(location)?;
        let function = caps
            .name("func")
            .map(|m| m.as_str().trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        Some((function, file, line, column))
    }
}

/// Split `file:line:column`, where `file` may itself contain colons.
fn split_location(location: &str) -> Option<(String, u32, u32)> {
    let mut parts = location.rsplitn(3, ':');
    let column = parts.next()?.parse().ok()?;
    let line = parts.next()?.parse().ok()?;
    let file = parts.next().filter(|f| !f.is_empty())?;
    Some((file.to_string(), line, column))
}

#[derive(Clone, Debug)]
pub struct Classifier {
    prefixes: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUMENTATION_PREFIXES.iter().copied())
    }
}

impl Classifier {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_instrumentation(&self, file: &str) -> bool {
        self.prefixes.iter().any(|p| file.starts_with(p.as_str()))
    }

    /// Parse every frame after the skipped header lines.
    pub fn frames(&self, stack: &str) -> Vec<Frame> {
        stack
            .lines()
            .enumerate()
            .skip(SKIPPED_LINES)
            .filter_map(|(index, text)| {
                let (function, file, line, column) =
                    FrameLayout::ALL.iter().find_map(|layout| layout.parse(text))?;
                let instrumentation = self.is_instrumentation(&file);
                Some(Frame {
                    function,
                    file,
                    line,
                    column,
                    index,
                    instrumentation,
                })
            })
            .collect()
    }

    /// Pick the caller frame to highlight. Never fails; traces with no usable
    /// frames yield [`Origin::unknown`].
    pub fn classify(&self, stack: &str) -> Origin {
        let frames = self.frames(stack);
        let Some(first) = frames.first() else {
            return Origin::unknown(stack);
        };

        // Every frame is instrumentation when no ordinary one exists, so the
        // first frame is also the first instrumentation frame.
        let primary = frames.iter().find(|f| !f.instrumentation).unwrap_or(first);

        let mut origin = Origin::from_frame(primary, stack);
        origin.has_instrumentation_frames = frames.iter().any(|f| f.instrumentation);
        if first.index != primary.index {
            origin.via_intermediate = Some(first.clone());
        }
        origin
    }
}

/// Classify with the default instrumentation prefixes.
pub fn classify(stack: &str) -> Origin {
    Classifier::default().classify(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V8_TRACE: &str = "Error\n    at Array.push (chrome-extension://abcdef/injected.js:40:17)\n    at trackClick (https://shop.example.com/static/app.js:120:9)\n    at HTMLButtonElement.<anonymous> (https://shop.example.com/static/app.js:88:3)";

    #[test]
    fn picks_first_ordinary_frame() {
        let origin = classify(V8_TRACE);
        assert_eq!(origin.file, "https://shop.example.com/static/app.js");
        assert_eq!((origin.line, origin.column), (120, 9));
        assert_eq!(origin.function.as_deref(), Some("trackClick"));
        assert_eq!(origin.frame_index, Some(2));
        assert!(!origin.has_instrumentation_frames);
        assert!(origin.via_intermediate.is_none());
        assert_eq!(origin.raw_stack, V8_TRACE);
    }

    #[test]
    fn records_instrumentation_frame_passed_through() {
        let stack = "Error\n    at hook (chrome-extension://abc/injected.js:1:1)\n    at gtmWrapper (chrome-extension://other/content.js:10:2)\n    at https://site.example/app.js:5:7";
        let origin = classify(stack);
        assert_eq!(origin.file, "https://site.example/app.js");
        assert_eq!(origin.function, None);
        assert!(origin.has_instrumentation_frames);
        let via = origin.via_intermediate.expect("intermediate frame");
        assert_eq!(via.file, "chrome-extension://other/content.js");
        assert_eq!(via.index, 2);
        assert!(via.instrumentation);
    }

    #[test]
    fn falls_back_to_first_instrumentation_frame() {
        let stack = "Error\n    at hook (chrome-extension://abc/injected.js:1:1)\n    at a (moz-extension://x/a.js:3:4)\n    at b (moz-extension://x/b.js:5:6)";
        let origin = classify(stack);
        assert_eq!(origin.file, "moz-extension://x/a.js");
        assert_eq!((origin.line, origin.column), (3, 4));
        assert!(origin.has_instrumentation_frames);
        assert!(origin.via_intermediate.is_none());
    }

    #[test]
    fn parses_at_sign_layout() {
        let stack = "\npush@moz-extension://abc/injected.js:40:17\nsendEvent@https://site.example/js/app.js:12:30\n@https://site.example/js/app.js:50:1";
        let origin = classify(stack);
        assert_eq!(origin.file, "https://site.example/js/app.js");
        assert_eq!((origin.line, origin.column), (12, 30));
        assert_eq!(origin.function.as_deref(), Some("sendEvent"));
        assert_eq!(origin.frame_index, Some(2));
    }

    #[test]
    fn unparseable_text_yields_unknown_origin() {
        for text in ["", "Error", "Error\nhook\nnot a frame at all", "\n\n:::\n@"] {
            let origin = classify(text);
            assert!(origin.is_unknown(), "expected unknown for {text:?}");
            assert_eq!(origin.line, 0);
            assert_eq!(origin.column, 0);
            assert_eq!(origin.raw_stack, text);
        }
    }

    #[test]
    fn custom_prefixes_drive_classification() {
        let classifier = Classifier::new(["https://cdn.tagmanager.example/"]);
        let stack = "Error\n    at hook (x.js:1:1)\n    at gtm (https://cdn.tagmanager.example/gtm.js:9:9)\n    at page (https://site.example/app.js:2:2)";
        let origin = classifier.classify(stack);
        assert_eq!(origin.file, "https://site.example/app.js");
        assert_eq!(
            origin.via_intermediate.map(|f| f.file).as_deref(),
            Some("https://cdn.tagmanager.example/gtm.js")
        );
    }
}
