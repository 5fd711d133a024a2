//! MLflow tracking server client (REST API 2.0, blocking).
//!
//! Model bytes and the input example are uploaded through the
//! `mlflow-artifacts` proxy under the run's artifact directory; the model
//! itself is recorded with `runs/log-model`.
//!
//! Credentials: when the configured token variable is set, the client probes
//! the server with a bearer token first. Only a 401/403 answer makes it fall
//! back to ambient credentials (`MLFLOW_TRACKING_USERNAME` /
//! `MLFLOW_TRACKING_PASSWORD`, or none). Every other failure propagates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{ModelRegistry, RegistryError};
use crate::config::RegistryConfig;
use crate::types::{
    model_uri, parse_model_uri, ArtifactBlob, LoggedModel, ModelSignature,
    RegisteredModelVersion, RunInfo, RunStatus,
};

/// File name of the serialized model inside the logged artifact directory.
pub const MODEL_FILE: &str = "model.bin.zst";

const USERNAME_ENV: &str = "MLFLOW_TRACKING_USERNAME";
const PASSWORD_ENV: &str = "MLFLOW_TRACKING_PASSWORD";

/// How requests authenticate.
#[derive(Clone)]
pub enum Credentials {
    Bearer(String),
    Basic { username: String, password: String },
    Anonymous,
}

impl Credentials {
    /// Basic auth from the environment, or none.
    pub fn ambient() -> Self {
        match (std::env::var(USERNAME_ENV), std::env::var(PASSWORD_ENV)) {
            (Ok(username), Ok(password)) if !username.is_empty() => Self::Basic { username, password },
            _ => Self::Anonymous,
        }
    }

    fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Bearer(token) => req.bearer_auth(token),
            Self::Basic { username, password } => req.basic_auth(username, Some(password)),
            Self::Anonymous => req,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Bearer(_) => "token",
            Self::Basic { .. } => "basic",
            Self::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct MlflowRunInfo {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    run_name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyValue {
    key: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Metric {
    key: String,
    value: f64,
}

#[derive(Debug, Default, Deserialize)]
struct MlflowRunData {
    #[serde(default)]
    params: Vec<KeyValue>,
    #[serde(default)]
    metrics: Vec<Metric>,
    #[serde(default)]
    tags: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct MlflowRun {
    info: MlflowRunInfo,
    #[serde(default)]
    data: MlflowRunData,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: MlflowRun,
}

#[derive(Debug, Deserialize)]
struct MlflowModelVersion {
    name: String,
    version: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    creation_timestamp: Option<i64>,
    #[serde(default)]
    tags: Vec<KeyValue>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionResponse {
    model_version: MlflowModelVersion,
}

#[derive(Serialize)]
struct ParamEntry<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct MetricEntry<'a> {
    key: &'a str,
    value: f64,
    timestamp: i64,
    step: i64,
}

fn millis(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(DateTime::from_timestamp_millis)
}

fn parse_version(name: &str, raw: &str) -> Result<u64, RegistryError> {
    raw.parse()
        .map_err(|_| RegistryError::Corrupt(format!("version '{raw}' of model '{name}'")))
}

impl MlflowModelVersion {
    fn into_version(self) -> Result<RegisteredModelVersion, RegistryError> {
        Ok(RegisteredModelVersion {
            version: parse_version(&self.name, &self.version)?,
            name: self.name,
            source: self.source,
            run_id: self.run_id,
            created_at: millis(self.creation_timestamp).unwrap_or_else(Utc::now),
            tags: self.tags.into_iter().map(|t| (t.key, t.value)).collect(),
            aliases: self.aliases,
        })
    }
}

fn run_status(raw: &str) -> RunStatus {
    match raw {
        "FINISHED" => RunStatus::Finished,
        "FAILED" | "KILLED" => RunStatus::Failed,
        _ => RunStatus::Running,
    }
}

/// Classify a response: success passes through, 401/403 is `Unauthorized`,
/// anything else is `ServerError` with the body text.
fn check(resp: Response) -> Result<Response, RegistryError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(RegistryError::Unauthorized(status));
    }
    let body = resp.text().unwrap_or_default();
    Err(RegistryError::ServerError { status, body })
}

/// MLflow error code carried by a `ServerError` body, if any.
fn error_code(err: &RegistryError) -> Option<String> {
    match err {
        RegistryError::ServerError { body, .. } => serde_json::from_str::<ApiError>(body)
            .ok()
            .map(|e| e.error_code),
        _ => None,
    }
}

pub struct MlflowRegistry {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl MlflowRegistry {
    /// Build the client and settle on credentials.
    pub fn connect(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let http = Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()?;
        let base_url = config.tracking_uri.trim_end_matches('/').to_string();
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());

        let mut registry = Self {
            http,
            base_url,
            credentials: Credentials::Anonymous,
        };

        if let Some(token) = token {
            registry.credentials = Credentials::Bearer(token);
            match registry.probe(&config.experiment) {
                Ok(()) => {
                    info!(uri = %registry.base_url, auth = "token", "Connected to tracking server");
                    return Ok(registry);
                }
                Err(RegistryError::Unauthorized(status)) => {
                    warn!(
                        status = %status,
                        "Tracking token rejected, falling back to ambient credentials"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        registry.credentials = Credentials::ambient();
        registry.probe(&config.experiment)?;
        info!(
            uri = %registry.base_url,
            auth = registry.credentials.label(),
            "Connected to tracking server"
        );
        Ok(registry)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{endpoint}", self.base_url)
    }

    fn artifact_url(&self, experiment_id: &str, run_id: &str, path: &str) -> String {
        format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{experiment_id}/{run_id}/artifacts/{path}",
            self.base_url
        )
    }

    fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RegistryError> {
        let req = self.http.get(self.url(endpoint)).query(query);
        let resp = check(self.credentials.apply(req).send()?)?;
        Ok(resp.json()?)
    }

    fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, RegistryError> {
        let req = self.http.post(self.url(endpoint)).json(body);
        let resp = check(self.credentials.apply(req).send()?)?;
        let text = resp.text()?;
        if text.trim().is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Authenticated request that succeeds whether or not the experiment
    /// exists.
    fn probe(&self, experiment: &str) -> Result<(), RegistryError> {
        match self.experiment_id(experiment) {
            Ok(_) => Ok(()),
            Err(e) if error_code(&e).as_deref() == Some("RESOURCE_DOES_NOT_EXIST") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn experiment_id(&self, name: &str) -> Result<String, RegistryError> {
        let resp: GetExperimentResponse =
            self.get("experiments/get-by-name", &[("experiment_name", name)])?;
        Ok(resp.experiment.experiment_id)
    }

    /// Experiment id for `name`, creating the experiment when missing.
    fn ensure_experiment(&self, name: &str) -> Result<String, RegistryError> {
        match self.experiment_id(name) {
            Ok(id) => Ok(id),
            Err(e) if error_code(&e).as_deref() == Some("RESOURCE_DOES_NOT_EXIST") => {
                let created: CreateExperimentResponse =
                    self.post("experiments/create", &json!({ "name": name }))?;
                info!(experiment = name, id = %created.experiment_id, "Experiment created");
                Ok(created.experiment_id)
            }
            Err(e) => Err(e),
        }
    }

    fn fetch_run(&self, run_id: &str) -> Result<MlflowRun, RegistryError> {
        let resp: RunResponse = self.get("runs/get", &[("run_id", run_id)])?;
        Ok(resp.run)
    }

    fn upload(&self, url: &str, bytes: Vec<u8>) -> Result<(), RegistryError> {
        let req = self.http.put(url).body(bytes);
        check(self.credentials.apply(req).send()?)?;
        Ok(())
    }

    fn log_batch(&self, run_id: &str, body: serde_json::Value) -> Result<(), RegistryError> {
        let mut body = body;
        body["run_id"] = json!(run_id);
        let _: serde_json::Value = self.post("runs/log-batch", &body)?;
        Ok(())
    }
}

impl ModelRegistry for MlflowRegistry {
    fn backend(&self) -> &'static str {
        "mlflow"
    }

    fn start_run(&self, experiment: &str, run_name: &str) -> Result<RunInfo, RegistryError> {
        let experiment_id = self.ensure_experiment(experiment)?;
        let now = Utc::now();
        let resp: RunResponse = self.post(
            "runs/create",
            &json!({
                "experiment_id": experiment_id,
                "run_name": run_name,
                "start_time": now.timestamp_millis(),
                "tags": [{ "key": "mlflow.runName", "value": run_name }],
            }),
        )?;
        Ok(RunInfo {
            run_id: resp.run.info.run_id,
            experiment: experiment.to_string(),
            run_name: run_name.to_string(),
            status: RunStatus::Running,
            start_time: now,
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
        })
    }

    fn get_run(&self, run_id: &str) -> Result<RunInfo, RegistryError> {
        let run = self.fetch_run(run_id)?;
        Ok(RunInfo {
            status: run_status(&run.info.status),
            start_time: millis(run.info.start_time).unwrap_or_else(Utc::now),
            end_time: millis(run.info.end_time),
            run_id: run.info.run_id,
            experiment: run.info.experiment_id,
            run_name: run.info.run_name,
            params: run.data.params.into_iter().map(|p| (p.key, p.value)).collect(),
            metrics: run.data.metrics.into_iter().map(|m| (m.key, m.value)).collect(),
            tags: run.data.tags.into_iter().map(|t| (t.key, t.value)).collect(),
        })
    }

    fn log_params(
        &self,
        run_id: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        let params: Vec<ParamEntry> = params
            .iter()
            .map(|(key, value)| ParamEntry { key, value })
            .collect();
        self.log_batch(run_id, json!({ "params": params }))
    }

    fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), RegistryError> {
        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<MetricEntry> = metrics
            .iter()
            .map(|(key, &value)| MetricEntry {
                key,
                value,
                timestamp,
                step: 0,
            })
            .collect();
        self.log_batch(run_id, json!({ "metrics": metrics }))
    }

    fn set_run_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), RegistryError> {
        let _: serde_json::Value = self.post(
            "runs/set-tag",
            &json!({ "run_id": run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model_bytes: &[u8],
        signature: &ModelSignature,
        input_example: &[Vec<f64>],
    ) -> Result<LoggedModel, RegistryError> {
        let experiment_id = self.fetch_run(run_id)?.info.experiment_id;

        let model_url = self.artifact_url(&experiment_id, run_id, &format!("{artifact_path}/{MODEL_FILE}"));
        self.upload(&model_url, model_bytes.to_vec())?;
        let example = serde_json::to_vec(&json!({ "data": input_example }))?;
        let example_url =
            self.artifact_url(&experiment_id, run_id, &format!("{artifact_path}/input_example.json"));
        self.upload(&example_url, example)?;

        let model_json = json!({
            "run_id": run_id,
            "artifact_path": artifact_path,
            "utc_time_created": Utc::now().to_rfc3339(),
            "flavors": { "predmaint": { "model_file": MODEL_FILE, "encoding": "json+zstd" } },
            "signature": {
                "inputs": serde_json::to_string(&signature.inputs)?,
                "outputs": serde_json::to_string(&signature.outputs)?,
            },
            "saved_input_example_info": { "artifact_path": "input_example.json", "type": "ndarray" },
        });
        let _: serde_json::Value = self.post(
            "runs/log-model",
            &json!({ "run_id": run_id, "model_json": model_json.to_string() }),
        )?;

        let blob = ArtifactBlob::describe(model_url, model_bytes);
        debug!(run_id, location = %blob.location, bytes = blob.size_bytes, "Model logged");
        Ok(LoggedModel {
            run_id: run_id.to_string(),
            artifact_path: artifact_path.to_string(),
            signature: signature.clone(),
            input_example: input_example.to_vec(),
            size_bytes: blob.size_bytes,
            md5: blob.md5,
        })
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<(), RegistryError> {
        let _: serde_json::Value = self.post(
            "runs/update",
            &json!({
                "run_id": run_id,
                "status": status.to_string(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )?;
        Ok(())
    }

    fn register_model(
        &self,
        name: &str,
        model_uri: &str,
        run_id: &str,
    ) -> Result<RegisteredModelVersion, RegistryError> {
        match self.post::<serde_json::Value>("registered-models/create", &json!({ "name": name })) {
            Ok(_) => info!(model = name, "Registered model created"),
            Err(e) if error_code(&e).as_deref() == Some("RESOURCE_ALREADY_EXISTS") => {}
            Err(e) => return Err(e),
        }
        let resp: ModelVersionResponse = self.post(
            "model-versions/create",
            &json!({ "name": name, "source": model_uri, "run_id": run_id }),
        )?;
        resp.model_version.into_version()
    }

    fn set_version_tag(
        &self,
        name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> Result<(), RegistryError> {
        let _: serde_json::Value = self.post(
            "model-versions/set-tag",
            &json!({ "name": name, "version": version.to_string(), "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn set_alias(&self, name: &str, alias: &str, version: u64) -> Result<(), RegistryError> {
        let _: serde_json::Value = self.post(
            "registered-models/alias",
            &json!({ "name": name, "alias": alias, "version": version.to_string() }),
        )?;
        Ok(())
    }

    fn get_version_by_alias(
        &self,
        name: &str,
        alias: &str,
    ) -> Result<RegisteredModelVersion, RegistryError> {
        let resp: Result<ModelVersionResponse, _> =
            self.get("registered-models/alias", &[("name", name), ("alias", alias)]);
        match resp {
            Ok(resp) => resp.model_version.into_version(),
            Err(e) if error_code(&e).as_deref() == Some("RESOURCE_DOES_NOT_EXIST") => {
                Err(RegistryError::AliasNotFound {
                    name: name.to_string(),
                    alias: alias.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn download_model(&self, uri: &str) -> Result<Vec<u8>, RegistryError> {
        let (run_id, path) =
            parse_model_uri(uri).ok_or_else(|| RegistryError::InvalidModelUri(uri.to_string()))?;
        let experiment_id = self.fetch_run(run_id)?.info.experiment_id;
        let url = self.artifact_url(&experiment_id, run_id, &format!("{path}/{MODEL_FILE}"));
        let resp = self.credentials.apply(self.http.get(&url)).send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::ArtifactNotFound(model_uri(run_id, path)));
        }
        Ok(check(resp)?.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_version_payload_parses() {
        let raw = r#"{"model_version":{"name":"logistic_equip_fail","version":"3",
            "source":"runs:/abc/model","run_id":"abc","creation_timestamp":1700000000000,
            "tags":[{"key":"stage","value":"Dev"}],"aliases":["dev"]}}"#;
        let resp: ModelVersionResponse = serde_json::from_str(raw).unwrap();
        let version = resp.model_version.into_version().unwrap();
        assert_eq!(version.version, 3);
        assert_eq!(version.tags["stage"], "Dev");
        assert_eq!(version.aliases, vec!["dev".to_string()]);
        assert_eq!(version.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn non_numeric_version_is_corrupt() {
        assert!(matches!(
            parse_version("m", "latest"),
            Err(RegistryError::Corrupt(_))
        ));
    }

    #[test]
    fn error_codes_are_read_from_server_errors() {
        let err = RegistryError::ServerError {
            status: StatusCode::NOT_FOUND,
            body: r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"nope"}"#.to_string(),
        };
        assert_eq!(error_code(&err).as_deref(), Some("RESOURCE_DOES_NOT_EXIST"));
        assert_eq!(error_code(&RegistryError::Unauthorized(StatusCode::FORBIDDEN)), None);
    }

    #[test]
    fn run_status_mapping() {
        assert_eq!(run_status("FINISHED"), RunStatus::Finished);
        assert_eq!(run_status("KILLED"), RunStatus::Failed);
        assert_eq!(run_status("RUNNING"), RunStatus::Running);
    }

    /// Answers one connection per canned `(status, body)` and returns the
    /// lowercased request heads it saw.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, std::thread::JoinHandle<Vec<String>>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                requests.push(String::from_utf8_lossy(&head).to_ascii_lowercase());
                let reply = format!(
                    "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).unwrap();
            }
            requests
        });
        (uri, handle)
    }

    const EXPERIMENT_FOUND: &str = r#"{"experiment":{"experiment_id":"7"}}"#;

    fn token_config(uri: String, token_env: &str) -> RegistryConfig {
        std::env::set_var(token_env, "secret-token");
        RegistryConfig {
            tracking_uri: uri,
            token_env: token_env.to_string(),
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn accepted_token_is_kept() {
        let (uri, server) = serve(vec![(200, EXPERIMENT_FOUND)]);
        let config = token_config(uri, "PREDMAINT_TEST_TOKEN_ACCEPTED");
        let registry = MlflowRegistry::connect(&config).unwrap();
        assert!(matches!(registry.credentials(), Credentials::Bearer(t) if t == "secret-token"));

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("authorization: bearer secret-token"));
        assert!(requests[0].contains("/api/2.0/mlflow/experiments/get-by-name"));
    }

    #[test]
    fn rejected_token_falls_back_to_ambient_credentials() {
        let (uri, server) = serve(vec![(401, ""), (200, EXPERIMENT_FOUND)]);
        let config = token_config(uri, "PREDMAINT_TEST_TOKEN_REJECTED");
        let registry = MlflowRegistry::connect(&config).unwrap();
        assert!(matches!(
            registry.credentials(),
            Credentials::Basic { .. } | Credentials::Anonymous
        ));

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("authorization: bearer secret-token"));
        assert!(!requests[1].contains("bearer"));
    }

    #[test]
    fn server_error_during_token_check_propagates() {
        use crate::error::{Classify, FailureKind};
        let (uri, server) = serve(vec![(500, r#"{"error_code":"INTERNAL_ERROR"}"#)]);
        let config = token_config(uri, "PREDMAINT_TEST_TOKEN_SERVER_ERROR");
        let err = MlflowRegistry::connect(&config).err().unwrap();
        assert!(matches!(
            err,
            RegistryError::ServerError { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(err.kind(), FailureKind::RegistryUnavailable);
        // No second attempt with other credentials
        assert_eq!(server.join().unwrap().len(), 1);
    }

    #[test]
    fn unreachable_server_is_registry_unavailable() {
        use crate::error::{Classify, FailureKind};
        let config = RegistryConfig {
            tracking_uri: "http://127.0.0.1:9".to_string(),
            token_env: "PREDMAINT_TEST_UNSET_TOKEN".to_string(),
            ..RegistryConfig::default()
        };
        let err = MlflowRegistry::connect(&config).err().unwrap();
        assert!(matches!(err, RegistryError::Http(_)));
        assert_eq!(err.kind(), FailureKind::RegistryUnavailable);
    }
}
