use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent_engine::state::{ExecutionResult, ExecutionStatus, PendingSafetyCheck, Proposal, Session};
use crate::config::{AuthStyle, ServiceConfig};
use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::executor::coordinator::DisplayBounds;
use crate::llm::provider::DecisionService;
use crate::llm::response_parser;
use crate::llm::retry::{with_retry, RetryPolicy};
use crate::llm::tools::computer_use_tool;
use crate::llm::types::{ContentPart, InputItem, ResponsesRequest, ScreenshotOutput};
use crate::perception::types::PerceptionPayload;

const CONTINUE_PROMPT: &str = "Continue with the task using the current screen.";

/// Decision service speaking the Responses API with the computer-use tool.
pub struct ResponsesDecisionService {
    id: String,
    endpoint: String,
    api_key: String,
    auth_style: AuthStyle,
    model: String,
    environment: String,
    truncation: String,
    task: String,
    bounds: DisplayBounds,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ResponsesDecisionService {
    pub fn new(
        service: &ServiceConfig,
        task: &str,
        bounds: DisplayBounds,
        retry: RetryPolicy,
    ) -> ChartPilotResult<Self> {
        if service.api_base.trim().is_empty() {
            return Err(ChartPilotError::Config("service.api_base is not set".into()));
        }
        if service.api_key.trim().is_empty() {
            return Err(ChartPilotError::Config(
                "no API key: set service.api_key or CHARTPILOT_API_KEY".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            id: "responses".into(),
            endpoint: service.api_base.trim().to_string(),
            api_key: service.api_key.trim().to_string(),
            auth_style: service.auth_style,
            model: service.model.clone(),
            environment: service.environment.clone(),
            truncation: service.truncation.clone(),
            task: task.to_string(),
            bounds,
            retry,
            client,
        })
    }

    fn request(&self, previous_response_id: Option<String>, input: Vec<InputItem>) -> ResponsesRequest {
        ResponsesRequest {
            model: self.model.clone(),
            previous_response_id,
            tools: vec![computer_use_tool(self.bounds, &self.environment)],
            input,
            truncation: self.truncation.clone(),
        }
    }

    fn user_turn(text: &str, payload: &PerceptionPayload) -> InputItem {
        InputItem::Message {
            role: "user".into(),
            content: vec![
                ContentPart::InputText { text: text.to_string() },
                ContentPart::InputImage {
                    image_url: payload.data_url(),
                },
            ],
        }
    }

    /// Posts the request, retrying transient failures, and decodes the answer.
    async fn exchange(&self, request: &ResponsesRequest) -> ChartPilotResult<Proposal> {
        let body = serde_json::to_value(request)?;

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            previous = ?request.previous_response_id,
            "sending decision request"
        );
        tracing::debug!(
            body = %sanitized_for_log(&body),
            "request body (sanitized, images omitted)"
        );

        let proposal = with_retry(&self.retry, "decision_request", || self.post_once(&body)).await?;

        tracing::info!(
            exchange_id = %proposal.exchange_id,
            actions = proposal.actions.len(),
            safety_checks = proposal.safety_checks.len(),
            complete = proposal.is_complete(),
            "decision service answered"
        );
        Ok(proposal)
    }

    async fn post_once(&self, body: &Value) -> ChartPilotResult<Proposal> {
        let builder = self.client.post(&self.endpoint).json(body);
        let builder = match self.auth_style {
            AuthStyle::Bearer => builder.bearer_auth(&self.api_key),
            AuthStyle::ApiKeyHeader => builder.header("api-key", &self.api_key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ChartPilotError::ServiceUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChartPilotError::ServiceUnavailable(format!("reading body failed: {e}")))?;

        if !status.is_success() {
            return Err(classify_status(status, text));
        }

        response_parser::parse_response(&text)
    }
}

/// Maps a non-success HTTP status onto the error taxonomy. Only server-side and
/// throttling statuses are worth retrying.
fn classify_status(status: reqwest::StatusCode, body: String) -> ChartPilotError {
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
    {
        ChartPilotError::ServiceUnavailable(format!("{status}: {body}"))
    } else {
        ChartPilotError::ServiceRejected {
            status: status.as_u16(),
            body,
        }
    }
}

/// Copy of the request body with every `image_url` replaced, for logging only.
fn sanitized_for_log(body: &Value) -> String {
    fn scrub(value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, v) in map.iter_mut() {
                    if key == "image_url" && v.is_string() {
                        *v = Value::String("<omitted_base64_image>".into());
                    } else {
                        scrub(v);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(scrub),
            _ => {}
        }
    }

    let mut log_body = body.clone();
    scrub(&mut log_body);
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[async_trait]
impl DecisionService for ResponsesDecisionService {
    fn name(&self) -> &str {
        &self.id
    }

    async fn propose(
        &self,
        payload: &PerceptionPayload,
        session: Option<&mut Session>,
    ) -> ChartPilotResult<Proposal> {
        match session {
            None => {
                let request = self.request(None, vec![Self::user_turn(&self.task, payload)]);
                self.exchange(&request).await
            }
            Some(session) => {
                if let Some(queued) = session.take_pending_proposal() {
                    tracing::debug!(exchange_id = %queued.exchange_id, "using proposal from last report");
                    return Ok(queued);
                }
                let request = self.request(
                    Some(session.last_exchange_id.clone()),
                    vec![Self::user_turn(CONTINUE_PROMPT, payload)],
                );
                let proposal = self.exchange(&request).await?;
                *session = session.advance(&proposal.exchange_id, None)?;
                Ok(proposal)
            }
        }
    }

    async fn report(
        &self,
        session: &Session,
        call_id: &str,
        result: &ExecutionResult,
        acknowledged: &[PendingSafetyCheck],
    ) -> ChartPilotResult<Session> {
        let payload = result.payload.as_ref().ok_or_else(|| {
            ChartPilotError::Capture("execution report has no screenshot attached".into())
        })?;

        let mut input = vec![InputItem::ComputerCallOutput {
            call_id: call_id.to_string(),
            output: ScreenshotOutput::new(payload.data_url()),
            acknowledged_safety_checks: acknowledged.iter().map(Into::into).collect(),
        }];

        match &result.status {
            ExecutionStatus::Ok => {}
            ExecutionStatus::Rejected { reason } | ExecutionStatus::Error { reason } => {
                input.push(InputItem::Message {
                    role: "user".into(),
                    content: vec![ContentPart::InputText {
                        text: format!(
                            "Only {} of the proposed actions were carried out: {reason}",
                            result.actions_executed
                        ),
                    }],
                });
            }
        }

        let request = self.request(Some(session.last_exchange_id.clone()), input);
        let next = self.exchange(&request).await?;
        let exchange_id = next.exchange_id.clone();
        session.advance(&exchange_id, Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::ScreenshotMeta;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> PerceptionPayload {
        PerceptionPayload {
            image_base64: "aVZCT1J3MEtHZ28=".into(),
            meta: ScreenshotMeta {
                monitor_index: 0,
                scale_factor: 1.0,
                physical_width: 1920,
                physical_height: 1080,
            },
            captured_at: chrono::Utc::now(),
        }
    }

    fn service(server: &MockServer, auth_style: AuthStyle) -> ResponsesDecisionService {
        let cfg = ServiceConfig {
            api_base: format!("{}/v1/responses", server.uri()),
            api_key: "test-key".into(),
            model: "computer-use-preview".into(),
            environment: "windows".into(),
            auth_style,
            request_timeout_secs: 5,
            truncation: "auto".into(),
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        };
        ResponsesDecisionService::new(&cfg, "Open the chart for patient 1234", DisplayBounds::new(1920, 1080), retry)
            .unwrap()
    }

    fn click_response(id: &str, call_id: &str) -> Value {
        json!({
            "id": id,
            "output": [{
                "type": "computer_call",
                "call_id": call_id,
                "action": {"type": "click", "button": "left", "x": 640, "y": 360},
                "pending_safety_checks": []
            }]
        })
    }

    #[tokio::test]
    async fn first_proposal_sends_task_and_screenshot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(click_response("resp-1", "call-1")))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&server, AuthStyle::Bearer);
        let proposal = svc.propose(&payload(), None).await.unwrap();
        assert_eq!(proposal.exchange_id, "resp-1");
        assert_eq!(proposal.call_id.as_deref(), Some("call-1"));
        assert_eq!(proposal.actions.len(), 1);

        let request = &server.received_requests().await.unwrap()[0];
        let body = request.body_json::<Value>().unwrap();
        assert!(body.get("previous_response_id").is_none());
        assert_eq!(body["tools"][0]["type"], "computer_use_preview");
        assert_eq!(body["tools"][0]["display_width"], 1920);
        assert_eq!(body["truncation"], "auto");
        let content = &body["input"][0]["content"];
        assert_eq!(content[0]["text"], "Open the chart for patient 1234");
        assert!(content[1]["image_url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn report_chains_and_queues_next_proposal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp-2",
                "output": [{"type": "message", "role": "assistant",
                            "content": [{"type": "output_text", "text": "Done."}]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&server, AuthStyle::ApiKeyHeader);
        let first = response_parser::proposal_from_response(
            serde_json::from_value(click_response("resp-1", "call-1")).unwrap(),
        )
        .unwrap();
        let session = Session::start(&first);
        let check = PendingSafetyCheck {
            id: "sc-1".into(),
            code: "sensitive_domain".into(),
            message: "Confirm".into(),
        };
        let result = ExecutionResult::ok(1).with_payload(payload());

        let mut next = svc.report(&session, "call-1", &result, &[check]).await.unwrap();
        assert_eq!(next.last_exchange_id, "resp-2");
        assert_eq!(next.turn_count, 1);

        let body = server.received_requests().await.unwrap()[0]
            .body_json::<Value>()
            .unwrap();
        assert_eq!(body["previous_response_id"], "resp-1");
        let output = &body["input"][0];
        assert_eq!(output["type"], "computer_call_output");
        assert_eq!(output["call_id"], "call-1");
        assert_eq!(output["output"]["type"], "computer_screenshot");
        assert_eq!(output["acknowledged_safety_checks"][0]["id"], "sc-1");

        // the answer to the report is handed out by the next propose, without a request
        let queued = svc.propose(&payload(), Some(&mut next)).await.unwrap();
        assert!(queued.is_complete());
        assert_eq!(queued.message.as_deref(), Some("Done."));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_execution_is_described_to_the_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(click_response("resp-2", "call-2")))
            .mount(&server)
            .await;

        let svc = service(&server, AuthStyle::Bearer);
        let first = response_parser::parse_response(&click_response("resp-1", "call-1").to_string()).unwrap();
        let session = Session::start(&first);
        let result = ExecutionResult::error("input refused")
            .with_executed(1)
            .with_payload(payload());

        svc.report(&session, "call-1", &result, &[]).await.unwrap();

        let body = server.received_requests().await.unwrap()[0]
            .body_json::<Value>()
            .unwrap();
        assert!(body["input"][0].get("acknowledged_safety_checks").is_none());
        let note = body["input"][1]["content"][0]["text"].as_str().unwrap();
        assert!(note.contains("input refused"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(click_response("resp-1", "call-1")))
            .mount(&server)
            .await;

        let svc = service(&server, AuthStyle::Bearer);
        let proposal = svc.propose(&payload(), None).await.unwrap();
        assert_eq!(proposal.exchange_id, "resp-1");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn persistent_unavailability_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let svc = service(&server, AuthStyle::Bearer);
        let err = svc.propose(&payload(), None).await.unwrap_err();
        assert!(matches!(err, ChartPilotError::ServiceUnavailable(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn malformed_response_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp-1",
                "output": [{"type": "computer_call", "call_id": "c", "action": {"type": "teleport"}}]
            })))
            .mount(&server)
            .await;

        let svc = service(&server, AuthStyle::Bearer);
        let err = svc.propose(&payload(), None).await.unwrap_err();
        assert!(matches!(err, ChartPilotError::MalformedResponse(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn client_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let svc = service(&server, AuthStyle::Bearer);
        match svc.propose(&payload(), None).await {
            Err(ChartPilotError::ServiceRejected { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let cfg = ServiceConfig {
            api_base: "https://example.invalid/v1/responses".into(),
            api_key: "  ".into(),
            model: "computer-use-preview".into(),
            environment: "windows".into(),
            auth_style: AuthStyle::Bearer,
            request_timeout_secs: 5,
            truncation: "auto".into(),
        };
        let result = ResponsesDecisionService::new(&cfg, "task", DisplayBounds::new(10, 10), RetryPolicy::default());
        assert!(matches!(result, Err(ChartPilotError::Config(_))));
    }

    #[test]
    fn log_body_omits_images() {
        let body = json!({"input": [{"content": [{"type": "input_image", "image_url": "data:image/png;base64,AAAA"}]}]});
        let logged = sanitized_for_log(&body);
        assert!(!logged.contains("AAAA"));
        assert!(logged.contains("<omitted_base64_image>"));
    }
}
