/// Which alternative of the extraction scan produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    FencedBlock,
    DoctypeMarker,
    Verbatim,
}

impl ArtifactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSource::FencedBlock => "fenced_block",
            ArtifactSource::DoctypeMarker => "doctype_marker",
            ArtifactSource::Verbatim => "verbatim",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedArtifact {
    pub text: String,
    pub source: ArtifactSource,
}

const FENCE_TAG: &str = "```html";
const FENCE: &str = "```";
const DOCTYPE_MARKER: &str = "<!doctype html";

/// Pull a renderable document out of an unstructured model response.
///
/// Ordered alternatives, first match wins: a fenced ```html block (the
/// trimmed interior), then a case-insensitive `<!doctype html` marker
/// (everything from the marker on, trimmed), then the raw text verbatim.
/// The verbatim fallback means this never fails to produce an artifact,
/// even when the response is prose.
pub fn extract_artifact(raw: &str) -> ExtractedArtifact {
    if let Some(interior) = fenced_block_interior(raw) {
        return ExtractedArtifact {
            text: interior.trim().to_string(),
            source: ArtifactSource::FencedBlock,
        };
    }
    if let Some(position) = find_ascii_case_insensitive(raw, DOCTYPE_MARKER) {
        return ExtractedArtifact {
            text: raw[position..].trim().to_string(),
            source: ArtifactSource::DoctypeMarker,
        };
    }
    ExtractedArtifact {
        text: raw.to_string(),
        source: ArtifactSource::Verbatim,
    }
}

fn fenced_block_interior(raw: &str) -> Option<&str> {
    let tag = raw.find(FENCE_TAG)?;
    let interior = &raw[tag + FENCE_TAG.len()..];
    let close = interior.find(FENCE)?;
    Some(&interior[..close])
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&start| {
        haystack[start..start + needle.len()]
            .iter()
            .zip(needle)
            .all(|(left, right)| left.eq_ignore_ascii_case(right))
    })
}

#[cfg(test)]
mod tests {
    use super::{extract_artifact, ArtifactSource};

    #[test]
    fn fenced_block_wins_over_surrounding_prose() {
        let raw = "Here is your page:\n```html\n<!DOCTYPE html><html></html>\n```\nEnjoy!";
        let extracted = extract_artifact(raw);
        assert_eq!(extracted.source, ArtifactSource::FencedBlock);
        assert_eq!(extracted.text, "<!DOCTYPE html><html></html>");
    }

    #[test]
    fn fenced_block_interior_is_trimmed() {
        let raw = "```html\n\n  <html><body>hi</body></html>  \n\n```";
        let extracted = extract_artifact(raw);
        assert_eq!(extracted.source, ArtifactSource::FencedBlock);
        assert_eq!(extracted.text, "<html><body>hi</body></html>");
    }

    #[test]
    fn first_fenced_block_wins_when_several_exist() {
        let raw = "```html\n<p>one</p>\n```\ntext\n```html\n<p>two</p>\n```";
        assert_eq!(extract_artifact(raw).text, "<p>one</p>");
    }

    #[test]
    fn unclosed_fence_falls_through_to_doctype_scan() {
        let raw = "```html\n<!DOCTYPE html><html><body>open</body></html>";
        let extracted = extract_artifact(raw);
        assert_eq!(extracted.source, ArtifactSource::DoctypeMarker);
        assert!(extracted.text.starts_with("<!DOCTYPE html"));
    }

    #[test]
    fn doctype_artifact_starts_exactly_at_the_marker() {
        let raw = "Sure, here you go: <!DOCTYPE html><html><body>ok</body></html>";
        let extracted = extract_artifact(raw);
        assert_eq!(extracted.source, ArtifactSource::DoctypeMarker);
        assert_eq!(
            extracted.text,
            "<!DOCTYPE html><html><body>ok</body></html>"
        );
    }

    #[test]
    fn doctype_marker_is_case_insensitive() {
        let raw = "prefix <!doctype HTML><html></html>";
        let extracted = extract_artifact(raw);
        assert_eq!(extracted.source, ArtifactSource::DoctypeMarker);
        assert_eq!(extracted.text, "<!doctype HTML><html></html>");
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        let raw = "  I could not produce a chart for that.  ";
        let extracted = extract_artifact(raw);
        assert_eq!(extracted.source, ArtifactSource::Verbatim);
        assert_eq!(extracted.text, raw, "verbatim path must not trim");
    }

    #[test]
    fn empty_input_is_verbatim_empty() {
        let extracted = extract_artifact("");
        assert_eq!(extracted.source, ArtifactSource::Verbatim);
        assert_eq!(extracted.text, "");
    }
}
