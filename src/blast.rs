use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;

use crate::error::AnnotateError;
use crate::http;

/// Remote homology search. Returns the raw BLAST XML document for one query.
pub trait SearchService: Send + Sync {
    fn search(&self, sequence: &str, params: &SearchParams) -> Result<String, AnnotateError>;
}

/// Fixed search settings: blastx against nr, restricted to prokaryotes and fungi.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub program: String,
    pub database: String,
    pub entrez_query: String,
    pub hitlist_size: u32,
    pub matrix: String,
    pub gap_open: u32,
    pub gap_extend: u32,
    pub word_size: u32,
    pub expect: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            program: "blastx".to_string(),
            database: "nr".to_string(),
            entrez_query: "Procaryotae[Organism] OR Fungi[Organism]".to_string(),
            hitlist_size: 5,
            matrix: "BLOSUM62".to_string(),
            gap_open: 11,
            gap_extend: 1,
            word_size: 6,
            expect: 1e-5,
        }
    }
}

impl SearchParams {
    pub fn gap_costs(&self) -> String {
        format!("{} {}", self.gap_open, self.gap_extend)
    }

    fn put_form(&self, sequence: &str) -> Vec<(&'static str, String)> {
        vec![
            ("CMD", "Put".to_string()),
            ("PROGRAM", self.program.clone()),
            ("DATABASE", self.database.clone()),
            ("QUERY", sequence.to_string()),
            ("ENTREZ_QUERY", self.entrez_query.clone()),
            ("HITLIST_SIZE", self.hitlist_size.to_string()),
            ("MATRIX_NAME", self.matrix.clone()),
            ("GAPCOSTS", self.gap_costs()),
            ("WORD_SIZE", self.word_size.to_string()),
            ("EXPECT", format!("{:e}", self.expect)),
            ("NCBI_GI", "T".to_string()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Ready,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub rid: String,
    pub estimated_wait: Duration,
}

/// Client for the NCBI BLAST URL API (`Blast.cgi`).
#[derive(Clone)]
pub struct NcbiBlastClient {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    email: Option<String>,
}

impl NcbiBlastClient {
    pub fn new(
        base_url: &str,
        poll_interval: Duration,
        email: Option<String>,
    ) -> Result<Self, AnnotateError> {
        let client = http::build_client(Duration::from_secs(120), AnnotateError::SearchHttp)?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            poll_interval,
            email,
        })
    }

    fn identity(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("TOOL", "fragment-annotator".to_string())];
        if let Some(email) = &self.email {
            fields.push(("EMAIL", email.clone()));
        }
        fields
    }

    /// Submission is not retried: a resubmit would queue a second search.
    fn submit(&self, sequence: &str, params: &SearchParams) -> Result<SubmittedJob, AnnotateError> {
        let mut form = params.put_form(sequence);
        form.extend(self.identity());
        let response = self
            .client
            .post(&self.base_url)
            .form(&form)
            .send()
            .map_err(|err| AnnotateError::SearchHttp(err.to_string()))?;
        let body = http::read_text(response, AnnotateError::SearchHttp, search_status)?;
        parse_qblast_info(&body)
    }

    fn status(&self, rid: &str) -> Result<JobStatus, AnnotateError> {
        let response = http::send_with_retries(
            || {
                self.client.get(&self.base_url).query(&[
                    ("CMD", "Get"),
                    ("FORMAT_OBJECT", "SearchInfo"),
                    ("RID", rid),
                ])
            },
            AnnotateError::SearchHttp,
        )?;
        let body = http::read_text(response, AnnotateError::SearchHttp, search_status)?;
        parse_job_status(&body)
    }

    fn fetch_xml(&self, rid: &str) -> Result<String, AnnotateError> {
        let response = http::send_with_retries(
            || {
                self.client.get(&self.base_url).query(&[
                    ("CMD", "Get"),
                    ("FORMAT_TYPE", "XML"),
                    ("RID", rid),
                ])
            },
            AnnotateError::SearchHttp,
        )?;
        http::read_text(response, AnnotateError::SearchHttp, search_status)
    }
}

impl SearchService for NcbiBlastClient {
    fn search(&self, sequence: &str, params: &SearchParams) -> Result<String, AnnotateError> {
        let job = self.submit(sequence, params)?;
        tracing::debug!(rid = %job.rid, wait_secs = job.estimated_wait.as_secs(), "BLAST job queued");
        thread::sleep(job.estimated_wait);
        loop {
            match self.status(&job.rid)? {
                JobStatus::Ready => return self.fetch_xml(&job.rid),
                JobStatus::Waiting => thread::sleep(self.poll_interval),
                JobStatus::Failed => {
                    return Err(AnnotateError::SearchFailed(format!(
                        "job {} reported FAILED",
                        job.rid
                    )));
                }
                JobStatus::Unknown => {
                    return Err(AnnotateError::SearchFailed(format!(
                        "job {} expired or is unknown",
                        job.rid
                    )));
                }
            }
        }
    }
}

fn search_status(status: u16, message: String) -> AnnotateError {
    AnnotateError::SearchStatus { status, message }
}

/// Reads `RID` and `RTOE` from the `QBlastInfo` comment block of a submission reply.
pub fn parse_qblast_info(body: &str) -> Result<SubmittedJob, AnnotateError> {
    let rid_re = Regex::new(r"(?m)^\s*RID = (\S+)").map_err(|err| {
        AnnotateError::SearchParse(err.to_string())
    })?;
    let rtoe_re = Regex::new(r"(?m)^\s*RTOE = (\d+)").map_err(|err| {
        AnnotateError::SearchParse(err.to_string())
    })?;
    let rid = rid_re
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AnnotateError::SearchParse("no RID in submission reply".to_string()))?;
    let seconds = rtoe_re
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(0);
    Ok(SubmittedJob {
        rid,
        estimated_wait: Duration::from_secs(seconds),
    })
}

pub fn parse_job_status(body: &str) -> Result<JobStatus, AnnotateError> {
    let status_re = Regex::new(r"Status=(\w+)")
        .map_err(|err| AnnotateError::SearchParse(err.to_string()))?;
    let status = status_re
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| AnnotateError::SearchParse("no Status in search info".to_string()))?;
    Ok(match status {
        "WAITING" => JobStatus::Waiting,
        "READY" => JobStatus::Ready,
        "FAILED" => JobStatus::Failed,
        _ => JobStatus::Unknown,
    })
}
