//! Source map support.
//!
//! Bundles carry V3 source maps built from two inputs: each module's own
//! SWC map (transpiled line/column → original position) and the linker's
//! positions (factory body → transpiled line/column). The two are composed
//! into one map per artifact.

use serde::{Deserialize, Serialize};

const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// VLQ-encode a signed integer and append to output string.
pub(crate) fn vlq_encode(value: i64, out: &mut String) {
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20; // continuation bit
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Decode one VLQ segment (comma-free) into its fields.
fn vlq_decode_segment(segment: &str) -> Option<Vec<i64>> {
    let mut fields = Vec::with_capacity(5);
    let mut value: i64 = 0;
    let mut shift = 0u32;

    for byte in segment.bytes() {
        let digit = i64::try_from(B64.iter().position(|&b| b == byte)?).ok()?;
        value += (digit & 0x1f) << shift;
        if digit & 0x20 == 0 {
            let negative = value & 1 == 1;
            value >>= 1;
            fields.push(if negative { -value } else { value });
            value = 0;
            shift = 0;
        } else {
            shift += 5;
            if shift > 60 {
                return None;
            }
        }
    }

    (shift == 0).then_some(fields)
}

/// A decoded mapping segment. Lines and columns are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub generated_column: u32,
    pub source: u32,
    pub source_line: u32,
    pub source_column: u32,
}

/// A decoded source map, indexed by generated line.
#[derive(Debug, Clone, Default)]
pub struct LineMap {
    lines: Vec<Vec<Segment>>,
}

#[derive(Deserialize)]
struct RawMap {
    mappings: String,
}

impl LineMap {
    /// Decode the `mappings` of a V3 source map JSON document.
    ///
    /// Segments without a source position are skipped; a malformed map
    /// yields `None`.
    #[must_use]
    pub fn parse(json: &str) -> Option<Self> {
        let raw: RawMap = serde_json::from_str(json).ok()?;
        Self::decode(&raw.mappings)
    }

    fn decode(mappings: &str) -> Option<Self> {
        let mut lines = Vec::new();
        let (mut source, mut source_line, mut source_column) = (0i64, 0i64, 0i64);

        for line in mappings.split(';') {
            let mut segments = Vec::new();
            let mut column = 0i64;

            for segment in line.split(',').filter(|s| !s.is_empty()) {
                let fields = vlq_decode_segment(segment)?;
                column += fields.first()?;
                if fields.len() < 4 {
                    continue;
                }
                source += fields[1];
                source_line += fields[2];
                source_column += fields[3];

                segments.push(Segment {
                    generated_column: u32::try_from(column).ok()?,
                    source: u32::try_from(source).ok()?,
                    source_line: u32::try_from(source_line).ok()?,
                    source_column: u32::try_from(source_column).ok()?,
                });
            }

            segments.sort_by_key(|s| s.generated_column);
            lines.push(segments);
        }

        Some(Self { lines })
    }

    /// Segments of a generated line.
    #[must_use]
    pub fn line(&self, line: usize) -> &[Segment] {
        self.lines.get(line).map_or(&[], Vec::as_slice)
    }

    /// Original position of a generated position.
    ///
    /// Uses the last segment at or before `column`, falling back to the
    /// first segment of the line.
    #[must_use]
    pub fn lookup(&self, line: usize, column: u32) -> Option<Segment> {
        let segments = self.line(line);
        segments
            .iter()
            .rev()
            .find(|s| s.generated_column <= column)
            .or_else(|| segments.first())
            .copied()
    }
}

/// Tracks source positions during bundle emission and generates a V3 sourcemap.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    /// Source paths, as written into the map.
    sources: Vec<String>,
    /// Original source content for each source.
    sources_content: Vec<String>,
    /// (generated_line, generated_col, source_idx, source_line, source_col).
    mappings: Vec<(u32, u32, u32, u32, u32)>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapJson<'a> {
    version: u8,
    file: &'a str,
    sources: &'a [String],
    sources_content: &'a [String],
    names: [&'a str; 0],
    mappings: String,
}

impl SourceMapBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source file and return its index.
    pub fn add_source(&mut self, path: &str, content: &str) -> u32 {
        let idx = u32::try_from(self.sources.len()).unwrap_or(u32::MAX);
        self.sources.push(path.to_string());
        self.sources_content.push(content.to_string());
        idx
    }

    /// Map a generated position to an original one.
    pub fn add_mapping(
        &mut self,
        generated_line: u32,
        generated_column: u32,
        source: u32,
        source_line: u32,
        source_column: u32,
    ) {
        self.mappings.push((
            generated_line,
            generated_column,
            source,
            source_line,
            source_column,
        ));
    }

    /// Number of mappings recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Encode the `mappings` field.
    fn encode_mappings(&self) -> String {
        let mut out = String::new();
        let mut sorted = self.mappings.clone();
        sorted.sort_by_key(|m| (m.0, m.1));
        sorted.dedup_by_key(|m| (m.0, m.1));

        let mut current_line: u32 = 0;
        let mut prev_column: i64 = 0;
        let mut prev_source: i64 = 0;
        let mut prev_source_line: i64 = 0;
        let mut prev_source_col: i64 = 0;
        let mut first_in_line = true;

        for (line, column, source, source_line, source_col) in sorted {
            while current_line < line {
                out.push(';');
                current_line += 1;
                prev_column = 0;
                first_in_line = true;
            }
            if !first_in_line {
                out.push(',');
            }
            first_in_line = false;

            vlq_encode(i64::from(column) - prev_column, &mut out);
            vlq_encode(i64::from(source) - prev_source, &mut out);
            vlq_encode(i64::from(source_line) - prev_source_line, &mut out);
            vlq_encode(i64::from(source_col) - prev_source_col, &mut out);

            prev_column = i64::from(column);
            prev_source = i64::from(source);
            prev_source_line = i64::from(source_line);
            prev_source_col = i64::from(source_col);
        }

        out
    }

    /// Generate a V3 sourcemap JSON string.
    pub fn generate(&self, file: &str) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SourceMapJson {
            version: 3,
            file,
            sources: &self.sources,
            sources_content: &self.sources_content,
            names: [],
            mappings: self.encode_mappings(),
        })
    }
}
