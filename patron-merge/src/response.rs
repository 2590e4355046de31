use serde::{Deserialize, Serialize};

use crate::error::MergeResult;

/// Message returned in the body of a successful run.
pub const SUCCESS_MESSAGE: &str = "Job ran successfully.";

#[derive(Debug, Serialize)]
struct ResponseBody<'a> {
    message: &'a str,
}

/// Response returned to the scheduler that triggered the job.
///
/// `body` is itself a JSON document, mirroring what HTTP-style schedulers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub status_code: u16,
    pub body: String,
}

impl JobResponse {
    /// Builds the response for a successful run.
    pub fn success() -> MergeResult<Self> {
        let body = serde_json::to_string(&ResponseBody {
            message: SUCCESS_MESSAGE,
        })?;

        Ok(Self {
            status_code: 200,
            body,
        })
    }

    /// Renders the response as a JSON document.
    pub fn to_json(&self) -> MergeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_serializes_camel_case() {
        let response = JobResponse::success().unwrap();

        assert_eq!(response.status_code, 200);
        insta::assert_snapshot!(
            response.to_json().unwrap(),
            @r#"{"statusCode":200,"body":"{\"message\":\"Job ran successfully.\"}"}"#
        );
    }

    #[test]
    fn body_carries_the_message() {
        let response = JobResponse::success().unwrap();

        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();

        assert_eq!(body["message"], SUCCESS_MESSAGE);
    }
}
