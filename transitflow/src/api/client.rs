//! Authenticated session against the upstream API.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use super::models::{LineVariant, PositionSnapshot, Stop};
use super::transport::{HttpTransport, Transport};
use crate::config::{ApiConfig, ProxyConfig};
use crate::errors::{ApiError, AuthError, TransportError};

/// Login endpoint.
pub const LOGIN_PATH: &str = "/Login/Autenticar";
/// All vehicle positions.
pub const POSITIONS_PATH: &str = "/Posicao";
/// Line search by public code.
pub const LINE_SEARCH_PATH: &str = "/Linha/Buscar";
/// Stops served by an internal line code.
pub const STOPS_BY_LINE_PATH: &str = "/Parada/BuscarParadasPorLinha";

/// Owns the login state and the single transport of one pipeline.
///
/// Session validity is never tracked by expiry time; it is inferred from
/// 401/403 answers. Each call re-authenticates at most once and replays the
/// request at most once.
#[derive(Debug)]
pub struct SessionClient<T = HttpTransport> {
    base_url: String,
    token: String,
    transport: T,
    authenticated: bool,
}

impl SessionClient<HttpTransport> {
    /// Creates a client over a fresh reqwest transport.
    pub fn connect(api: &ApiConfig, proxy: Option<&ProxyConfig>) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(api, proxy)?;
        Ok(Self::new(&api.base_url, &api.token, transport))
    }
}

impl<T: Transport> SessionClient<T> {
    /// Creates a client over an existing transport.
    #[must_use]
    pub fn new(base_url: &str, token: &str, transport: T) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            transport,
            authenticated: false,
        }
    }

    /// Whether a login has succeeded and no auth failure was seen since.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Forgets the current login so the next cycle authenticates again.
    pub fn invalidate(&mut self) {
        self.authenticated = false;
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Logs in. Succeeds iff the body is `true`, ignoring case and whitespace.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        let url = self.url(LOGIN_PATH);
        let response = self
            .transport
            .post(&url, &[("token", self.token.as_str())])
            .await?;

        if response.body.trim().eq_ignore_ascii_case("true") {
            self.authenticated = true;
            info!("Authenticated against upstream API");
            Ok(())
        } else {
            self.authenticated = false;
            Err(AuthError::rejected(response.body))
        }
    }

    /// Issues an authenticated GET and parses the body as JSON.
    ///
    /// On 401/403 the client logs in again and replays the call once. A
    /// second refusal surfaces as [`ApiError::Unauthorized`].
    pub async fn get(&mut self, path: &str, params: &[(&str, &str)]) -> Result<Value, ApiError> {
        let url = self.url(path);
        let mut retried = false;

        loop {
            let response = self.transport.get(&url, params).await?;

            if response.status == 200 {
                return serde_json::from_str(&response.body)
                    .map_err(|e| ApiError::decode(path, e));
            }

            if response.is_auth_failure() {
                self.authenticated = false;
                if retried {
                    return Err(ApiError::Unauthorized {
                        path: path.to_string(),
                        status: response.status,
                    });
                }
                warn!(path, status = response.status, "Session expired, re-authenticating");
                self.authenticate().await?;
                retried = true;
                continue;
            }

            return Err(ApiError::server(path, response.status, response.body));
        }
    }

    async fn get_typed<R: DeserializeOwned>(
        &mut self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<R>, ApiError> {
        match self.get(path, params).await? {
            Value::Null => Ok(None),
            value => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ApiError::decode(path, e)),
        }
    }

    /// Fetches all vehicle positions. `None` when the API returned no data.
    pub async fn positions(&mut self) -> Result<Option<PositionSnapshot>, ApiError> {
        let snapshot: Option<PositionSnapshot> = self.get_typed(POSITIONS_PATH, &[]).await?;
        Ok(snapshot.filter(|s| s.server_time.is_some() || !s.lines.is_empty()))
    }

    /// Searches line variants by public line code.
    ///
    /// A body that is not a list yields no variants.
    pub async fn search_lines(&mut self, line_code: &str) -> Result<Vec<LineVariant>, ApiError> {
        let value = self
            .get(LINE_SEARCH_PATH, &[("termosBusca", line_code)])
            .await?;
        decode_list(LINE_SEARCH_PATH, value)
    }

    /// Lists the stops served by an internal line code.
    ///
    /// A body that is not a list yields no stops.
    pub async fn stops_by_line(&mut self, internal_code: i64) -> Result<Vec<Stop>, ApiError> {
        let code = internal_code.to_string();
        let value = self
            .get(STOPS_BY_LINE_PATH, &[("codigoLinha", code.as_str())])
            .await?;
        decode_list(STOPS_BY_LINE_PATH, value)
    }
}

fn decode_list<R: DeserializeOwned>(path: &str, value: Value) -> Result<Vec<R>, ApiError> {
    match value {
        Value::Array(_) => serde_json::from_value(value).map_err(|e| ApiError::decode(path, e)),
        _ => Ok(Vec::new()),
    }
}
