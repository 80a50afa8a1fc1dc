use super::extract::clean_line;

/// Pixel box of a recognized word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

impl Bounds {
    pub fn new(left: i64, top: i64, width: i64, height: i64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn center_y(&self) -> f64 {
        self.top as f64 + self.height as f64 / 2.0
    }

    /// Same box moved by `(dx, dy)`.
    pub fn shifted(&self, dx: i64, dy: i64) -> Self {
        Self::new(self.left + dx, self.top + dy, self.width, self.height)
    }

    /// Maps a box found on an image upscaled by `scale` back to source pixels.
    pub fn unscaled(&self, scale: u32) -> Self {
        if scale <= 1 {
            return *self;
        }
        let s = scale as f64;
        let div = |v: i64| (v as f64 / s).round() as i64;
        Self::new(div(self.left), div(self.top), div(self.width), div(self.height))
    }
}

/// A single word returned by the OCR provider. Location endpoints fill in
/// `bounds`; text-only endpoints leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrWord {
    pub text: String,
    pub bounds: Option<Bounds>,
}

impl OcrWord {
    pub fn located(text: impl Into<String>, bounds: Bounds) -> Self {
        Self {
            text: text.into(),
            bounds: Some(bounds),
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bounds: None,
        }
    }
}

/// A visual line: located words whose vertical centers agree.
#[derive(Debug, Clone)]
pub struct OcrLine {
    /// Cleaned word texts joined by single spaces
    pub text: String,
    pub words: Vec<OcrWord>,
}

/// Raw text of a recognition result, one word per line.
pub fn words_to_text(words: &[OcrWord]) -> String {
    words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Groups located words into lines.
///
/// Words are visited by top, then left. A word joins the current line when its
/// center y lies within `max(8, round(0.65 * average height))` of the mean
/// center of the words already in it. Inside a line words are ordered left to
/// right. Blank words, words without bounds and lines that clean to nothing
/// are dropped.
pub fn build_ocr_lines(words: &[OcrWord]) -> Vec<OcrLine> {
    let mut located: Vec<(&OcrWord, Bounds)> = words
        .iter()
        .filter(|w| !w.text.trim().is_empty())
        .filter_map(|w| w.bounds.map(|b| (w, b)))
        .collect();
    if located.is_empty() {
        return Vec::new();
    }
    located.sort_by_key(|(_, b)| (b.top, b.left));

    let avg_height =
        located.iter().map(|(_, b)| b.height as f64).sum::<f64>() / located.len() as f64;
    let threshold = (avg_height * 0.65).round().max(8.0);

    let mut groups: Vec<Vec<(&OcrWord, Bounds)>> = Vec::new();
    for (word, bounds) in located {
        if let Some(group) = groups.last_mut() {
            let mean_center =
                group.iter().map(|(_, b)| b.center_y()).sum::<f64>() / group.len() as f64;
            if (bounds.center_y() - mean_center).abs() <= threshold {
                group.push((word, bounds));
                continue;
            }
        }
        groups.push(vec![(word, bounds)]);
    }

    groups
        .into_iter()
        .filter_map(|mut group| {
            group.sort_by_key(|(_, b)| b.left);
            let text = group
                .iter()
                .map(|(w, _)| clean_line(&w.text))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return None;
            }
            Some(OcrLine {
                text,
                words: group.into_iter().map(|(w, _)| w.clone()).collect(),
            })
        })
        .collect()
}
