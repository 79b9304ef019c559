use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use crate::adapters::authority::{AuthorityError, RemoteAuthority};
use crate::domain::authority_payload::{
    parse_estimate_seconds, parse_in_progress_session, parse_occupancy, parse_session_id,
};
use crate::domain::occupancy::{ActorId, InProgressSession, OccupancySnapshot};
use crate::domain::station::{Station, StationSet};

#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EstimateBody<'a> {
    actor_id: &'a str,
    stations: StationSet,
    capacity_liters: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordSessionBody<'a> {
    actor_id: &'a str,
    amount: f64,
    stations: StationSet,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordStopBody<'a> {
    actor_id: &'a str,
}

impl HttpAuthority {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthorityError> {
        let invalid = |reason: String| AuthorityError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };
        let parsed = Url::parse(base_url.trim()).map_err(|err| invalid(err.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("url cannot carry a path".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// Appends percent-encoded path segments to the base url.
    fn url(&self, segments: &[&str]) -> Result<Url, AuthorityError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AuthorityError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "url cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_empty(&self, segments: &[&str]) -> Result<(), AuthorityError> {
        let response = self.client.post(self.url(segments)?).send().await?;
        read_body(response).await.map(|_| ())
    }
}

/// Reads a response body as JSON. Empty bodies and `204` become `Null`.
async fn read_body(response: Response) -> Result<Value, AuthorityError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(AuthorityError::Status {
            status: status.as_u16(),
            body,
        });
    }

    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(AuthorityError::from)
}

impl RemoteAuthority for HttpAuthority {
    async fn occupancy(&self) -> Result<OccupancySnapshot, AuthorityError> {
        let response = self.client.get(self.url(&["occupancy"])?).send().await?;
        let payload = read_body(response).await?;
        Ok(parse_occupancy(&payload)?)
    }

    async fn in_progress_session(
        &self,
        actor: &ActorId,
    ) -> Result<Option<InProgressSession>, AuthorityError> {
        let response = self
            .client
            .get(self.url(&["sessions", "in-progress", actor.as_str()])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let payload = read_body(response).await?;
        Ok(parse_in_progress_session(&payload)?)
    }

    async fn start_station(&self, station: Station) -> Result<(), AuthorityError> {
        self.post_empty(&["stations", station.label(), "start"]).await
    }

    async fn stop_station(&self, station: Station) -> Result<(), AuthorityError> {
        self.post_empty(&["stations", station.label(), "stop"]).await
    }

    async fn estimate_duration(
        &self,
        actor: &ActorId,
        stations: StationSet,
        capacity_liters: f64,
    ) -> Result<u32, AuthorityError> {
        let response = self
            .client
            .post(self.url(&["estimates"])?)
            .json(&EstimateBody {
                actor_id: actor.as_str(),
                stations,
                capacity_liters,
            })
            .send()
            .await?;
        let payload = read_body(response).await?;
        Ok(parse_estimate_seconds(&payload)?)
    }

    async fn record_session(
        &self,
        actor: &ActorId,
        amount_liters: f64,
        stations: StationSet,
    ) -> Result<String, AuthorityError> {
        let response = self
            .client
            .post(self.url(&["sessions"])?)
            .json(&RecordSessionBody {
                actor_id: actor.as_str(),
                amount: amount_liters,
                stations,
            })
            .send()
            .await?;
        let payload = read_body(response).await?;
        Ok(parse_session_id(&payload)?)
    }

    async fn record_stop(
        &self,
        actor: &ActorId,
        remote_session_id: &str,
    ) -> Result<(), AuthorityError> {
        let response = self
            .client
            .post(self.url(&["sessions", remote_session_id, "stop"])?)
            .json(&RecordStopBody {
                actor_id: actor.as_str(),
            })
            .send()
            .await?;
        read_body(response).await.map(|_| ())
    }
}
