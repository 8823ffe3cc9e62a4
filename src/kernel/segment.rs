use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Speaking rate used for pre-generation duration estimates.
pub const WORDS_PER_MINUTE: f64 = 165.0;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid segment name `{name}`: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("duplicate segment name `{0}`")]
    DuplicateName(String),

    #[error("segments `{first}` and `{second}` share ordinal {ordinal}")]
    DuplicateOrdinal {
        ordinal: u32,
        first: String,
        second: String,
    },

    #[error("segment `{later}` sorts before `{earlier}` by name but after it by ordinal")]
    OrderMismatch { earlier: String, later: String },

    #[error("{scripts} scripts need {expected} transitions, got {got}")]
    TransitionCount {
        scripts: usize,
        expected: usize,
        got: usize,
    },

    #[error("catalog is empty")]
    Empty,

    #[error("manifest {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Intro,
    Script,
    Transition,
    Outro,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SegmentKind::Intro => "intro",
            SegmentKind::Script => "script",
            SegmentKind::Transition => "transition",
            SegmentKind::Outro => "outro",
        };
        f.write_str(s)
    }
}

/// One named unit of text destined to become one audio artifact.
///
/// Names follow `{ordinal}_-_{kind}[_{index}]` (or `{ordinal}_{kind}[_{index}]`),
/// zero-padded so that sorting names sorts playback order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    name: String,
    ordinal: u32,
    kind: SegmentKind,
    /// Script number for scripts, leading script number for transitions.
    index: Option<u32>,
    text: String,
}

impl Segment {
    /// Parse a segment from its catalog name and text.
    pub fn parse(name: &str, text: impl Into<String>) -> Result<Self, CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let digits = name.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid("missing leading ordinal"));
        }
        let ordinal: u32 = name[..digits]
            .parse()
            .map_err(|_| invalid("ordinal out of range"))?;

        let rest = &name[digits..];
        let base = rest
            .strip_prefix("_-_")
            .or_else(|| rest.strip_prefix('_'))
            .ok_or_else(|| invalid("ordinal must be followed by `_-_` or `_`"))?;

        let mut parts = base.split('_');
        let (kind, index) = match parts.next() {
            Some("intro") => (SegmentKind::Intro, None),
            Some("outro") => (SegmentKind::Outro, None),
            Some("script") => (SegmentKind::Script, Some(parse_index(parts.next(), &invalid)?)),
            Some("transition") | Some("interstitial") => {
                let from = parse_index(parts.next(), &invalid)?;
                let _to = parse_index(parts.next(), &invalid)?;
                (SegmentKind::Transition, Some(from))
            }
            _ => return Err(invalid("unknown segment kind")),
        };
        if parts.next().is_some() {
            return Err(invalid("trailing name components"));
        }

        Ok(Self {
            name: name.to_string(),
            ordinal,
            kind,
            index,
            text: text.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Seconds of audio this segment is expected to produce, from word count.
    /// Only meaningful before the real artifact exists.
    pub fn expected_duration_estimate(&self) -> f64 {
        self.word_count() as f64 / WORDS_PER_MINUTE * 60.0
    }
}

fn parse_index(
    part: Option<&str>,
    invalid: &dyn Fn(&str) -> CatalogError,
) -> Result<u32, CatalogError> {
    part.filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| invalid("missing or malformed index"))
}

/// Canonical segment name for a position in an episode of `scripts` scripts.
///
/// Layout: intro = 0, script `n` = `2n - 1`, transition `n -> n+1` = `2n`,
/// outro = `2 * scripts`.
pub fn segment_name(kind: SegmentKind, script_num: u32, scripts: u32) -> String {
    let outro = 2 * scripts.max(1);
    let width = outro.to_string().len().max(2);
    match kind {
        SegmentKind::Intro => format!("{:0width$}_-_intro", 0),
        SegmentKind::Outro => format!("{:0width$}_-_outro", outro),
        SegmentKind::Script => {
            format!("{:0width$}_-_script_{:02}", 2 * script_num - 1, script_num)
        }
        SegmentKind::Transition => format!(
            "{:0width$}_-_transition_{:02}_{:02}",
            2 * script_num,
            script_num,
            script_num + 1
        ),
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    segments: Vec<String>,
}

/// The full, ordered segment set of one run. Fixed at run start.
#[derive(Debug, Clone)]
pub struct Catalog {
    segments: Vec<Segment>,
}

impl Catalog {
    /// Build a catalog from `(name, text)` pairs in any order.
    pub fn new<I, N, T>(pairs: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (N, T)>,
        N: AsRef<str>,
        T: Into<String>,
    {
        let mut segments = Vec::new();
        let mut names = BTreeSet::new();
        for (name, text) in pairs {
            let segment = Segment::parse(name.as_ref(), text)?;
            if !names.insert(segment.name.clone()) {
                return Err(CatalogError::DuplicateName(segment.name));
            }
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(CatalogError::Empty);
        }

        segments.sort_by_key(|s| s.ordinal);
        for pair in segments.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.ordinal == b.ordinal {
                return Err(CatalogError::DuplicateOrdinal {
                    ordinal: a.ordinal,
                    first: a.name.clone(),
                    second: b.name.clone(),
                });
            }
            if a.name > b.name {
                return Err(CatalogError::OrderMismatch {
                    earlier: a.name.clone(),
                    later: b.name.clone(),
                });
            }
        }

        Ok(Self { segments })
    }

    /// Lay out intro, N scripts, N-1 transitions and outro under canonical names.
    pub fn compose(
        intro: &str,
        scripts: &[String],
        transitions: &[String],
        outro: &str,
    ) -> Result<Self, CatalogError> {
        let expected = scripts.len().saturating_sub(1);
        if transitions.len() != expected {
            return Err(CatalogError::TransitionCount {
                scripts: scripts.len(),
                expected,
                got: transitions.len(),
            });
        }

        let n = scripts.len() as u32;
        let mut pairs = vec![(segment_name(SegmentKind::Intro, 0, n), intro.to_string())];
        for (i, script) in scripts.iter().enumerate() {
            let num = i as u32 + 1;
            pairs.push((segment_name(SegmentKind::Script, num, n), script.clone()));
            if let Some(transition) = transitions.get(i) {
                pairs.push((segment_name(SegmentKind::Transition, num, n), transition.clone()));
            }
        }
        pairs.push((segment_name(SegmentKind::Outro, 0, n), outro.to_string()));

        Self::new(pairs)
    }

    /// Load `manifest.json` (`{"segments": [names]}`) and the `{name}.txt` next to it.
    pub fn load_manifest(dir: &Path) -> Result<Self, CatalogError> {
        let path = dir.join(MANIFEST_FILE);
        let manifest_err = |reason: String| CatalogError::Manifest {
            path: path.clone(),
            reason,
        };

        let raw = fs::read_to_string(&path).map_err(|e| manifest_err(e.to_string()))?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| manifest_err(e.to_string()))?;

        let mut pairs = Vec::with_capacity(manifest.segments.len());
        for name in manifest.segments {
            let text_path = dir.join(format!("{name}.txt"));
            let text = fs::read_to_string(&text_path)
                .map_err(|e| manifest_err(format!("{}: {e}", text_path.display())))?;
            pairs.push((name, text));
        }
        Self::new(pairs)
    }

    /// Segments in playback order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn estimated_total_duration(&self) -> f64 {
        self.segments.iter().map(Segment::expected_duration_estimate).sum()
    }

    /// Segments not present in `done`, in playback order.
    pub fn without<V>(&self, done: &BTreeMap<String, V>) -> Vec<Segment> {
        self.segments
            .iter()
            .filter(|s| !done.contains_key(&s.name))
            .cloned()
            .collect()
    }
}
