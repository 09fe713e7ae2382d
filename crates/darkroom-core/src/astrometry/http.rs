use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::error::Result;

use super::{PlateSolver, SolveRequest, SolveResponse};

/// Blocking JSON client for the astrometry service.
#[derive(Debug)]
pub struct HttpPlateSolver {
    url: String,
    client: Client,
}

impl HttpPlateSolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PlateSolver for HttpPlateSolver {
    /// Connection failures and timeouts are returned as errors. A non-2xx
    /// reply is a failed solve carrying whatever message the service sent.
    fn solve(&self, request: &SolveRequest) -> Result<SolveResponse> {
        let response = self.client.post(&self.url).json(request).send()?;
        let status = response.status();
        debug!(status = %status, sources = request.x.len(), "Astrometry service replied");

        if !status.is_success() {
            let body: SolveResponse = response.json().unwrap_or_default();
            let message = body
                .message
                .unwrap_or_else(|| format!("astrometry service returned HTTP {status}"));
            return Ok(SolveResponse {
                message: Some(message),
                solve_id: body.solve_id,
                ..SolveResponse::default()
            });
        }
        Ok(response.json()?)
    }
}
