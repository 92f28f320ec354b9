//! BLAST XML result parsing.
//!
//! Only the fields needed for an alignment row are deserialized; everything
//! else in the `BlastOutput` document is ignored.

use serde::Deserialize;

use crate::domain::AlignmentRecord;
use crate::error::AnnotateError;

#[derive(Debug, Deserialize)]
#[serde(rename = "BlastOutput")]
struct BlastOutputXml {
    #[serde(rename = "BlastOutput_iterations", default)]
    iterations: Option<IterationsXml>,
}

#[derive(Debug, Deserialize)]
struct IterationsXml {
    #[serde(rename = "Iteration", default)]
    iterations: Vec<IterationXml>,
}

#[derive(Debug, Deserialize)]
struct IterationXml {
    #[serde(rename = "Iteration_hits", default)]
    hits: Option<HitsXml>,
}

#[derive(Debug, Deserialize)]
struct HitsXml {
    #[serde(rename = "Hit", default)]
    hits: Vec<HitXml>,
}

#[derive(Debug, Deserialize)]
struct HitXml {
    #[serde(rename = "Hit_def", default)]
    def: String,
    #[serde(rename = "Hit_accession")]
    accession: String,
    #[serde(rename = "Hit_hsps", default)]
    hsps: Option<HspsXml>,
}

#[derive(Debug, Deserialize)]
struct HspsXml {
    #[serde(rename = "Hsp", default)]
    hsps: Vec<HspXml>,
}

#[derive(Debug, Deserialize)]
struct HspXml {
    #[serde(rename = "Hsp_score")]
    score: f64,
    #[serde(rename = "Hsp_evalue")]
    evalue: f64,
    #[serde(rename = "Hsp_identity", default)]
    identity: Option<u32>,
    #[serde(rename = "Hsp_positive", default)]
    positive: Option<u32>,
    // BLAST omits the element when the alignment is ungapped.
    #[serde(rename = "Hsp_gaps", default)]
    gaps: Option<u32>,
}

/// Parses one BLAST XML document into alignment records, one per hit.
///
/// Each record summarizes the hit's first (highest scoring) HSP. Hits
/// without any HSP are skipped. A hit title without an organism tag yields a
/// record with `organism_name: None`; deciding what that means is left to the
/// caller.
pub fn extract(document: &str) -> Result<Vec<AlignmentRecord>, AnnotateError> {
    if !document.contains("<BlastOutput") {
        return Err(AnnotateError::SearchParse(
            "document is not BLAST XML".to_string(),
        ));
    }
    let parsed: BlastOutputXml = quick_xml::de::from_str(document)
        .map_err(|err| AnnotateError::SearchParse(err.to_string()))?;

    let hits = parsed
        .iterations
        .into_iter()
        .flat_map(|iterations| iterations.iterations)
        .filter_map(|iteration| iteration.hits)
        .flat_map(|hits| hits.hits);

    let mut records = Vec::new();
    for hit in hits {
        let Some(hsp) = hit.hsps.and_then(|hsps| hsps.hsps.into_iter().next()) else {
            continue;
        };
        let (protein_name, organism_name) = parse_title(primary_title(&hit.def));
        records.push(AlignmentRecord {
            accession: hit.accession.trim().to_string(),
            title: hit.def,
            protein_name,
            organism_name,
            score: hsp.score,
            expect: hsp.evalue,
            identities: hsp.identity.unwrap_or(0),
            positives: hsp.positive.unwrap_or(0),
            gaps: hsp.gaps.unwrap_or(0),
        });
    }
    Ok(records)
}

/// Redundant database entries are joined into one definition with ` >`.
fn primary_title(def: &str) -> &str {
    def.split(" >").next().unwrap_or(def)
}

/// Splits a hit title into protein name and organism name.
///
/// The organism is the last top-level bracketed group. A group opens at a
/// `[` and closes at the `]` that brings the bracket balance below its
/// opening level, so nested tags such as `[[Clostridium] innocuum]` stay
/// intact. The protein name is always the text before the first `[`.
pub fn parse_title(title: &str) -> (String, Option<String>) {
    let Some(first_open) = title.find('[') else {
        return (title.trim().to_string(), None);
    };

    let protein_name = title[..first_open].trim().to_string();
    let mut depth = 0usize;
    let mut open_at = None;
    let mut last_group = None;
    for (offset, ch) in title[first_open..].char_indices() {
        let pos = first_open + offset;
        match ch {
            '[' => {
                if depth == 0 {
                    open_at = Some(pos);
                }
                depth += 1;
            }
            ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(open) = open_at.take() {
                        last_group = Some((open, pos));
                    }
                }
            }
            _ => {}
        }
    }

    let organism = last_group
        .map(|(open, close)| title[open + 1..close].trim())
        .filter(|organism| !organism.is_empty())
        .map(str::to_string);
    (protein_name, organism)
}
