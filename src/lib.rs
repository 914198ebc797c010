use std::io::Write;

pub mod config;

pub use config::Config;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("The configuration contains errors: {0}")]
    BadConfigurationError(String),

    #[error("Failed to serialize request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Failed to deserialize response: {0}")]
    DeserializationError(serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("The response contained no choices")]
    EmptyResponse,

    #[error("Failed to write output: {0}")]
    OutputError(std::io::Error),
}

pub const ROLE_SYSTEM: &str = "system";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

// NOTE: Compatible servers may reject options they don't know, even when
// they're "null", so the body carries nothing beyond `messages` and `model`.

/// Chat completions request.
///
/// For reference, see: https://platform.openai.com/docs/api-reference/chat
#[derive(Debug, serde::Serialize)]
pub struct ChatCompletions {
    pub messages: Vec<Message>,
    pub model: String,
}

impl ChatCompletions {
    pub fn new(model: &str, messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: model.into(),
        }
    }

    /// The one-message conversation this program sends: a lone system prompt.
    pub fn greeting(model: &str) -> Self {
        Self::new(model, vec![Message::new(ROLE_SYSTEM, SYSTEM_PROMPT)])
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: usize,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Only `choices` is required; servers differ in what else they return.
#[derive(Debug, serde::Deserialize)]
pub struct ChatCompletionsResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
}

impl ChatCompletionsResponse {
    /// Text of the first choice. A `null` content reads as empty text.
    pub fn first_content(&self) -> Result<&str, Error> {
        let choice = self.choices.first().ok_or(Error::EmptyResponse)?;
        Ok(choice.message.content.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Moves a JSON body to an endpoint and hands back the response body.
///
/// Implementations return `Error::NetworkError` for transport failures and
/// `Error::ApiError` for non-success statuses.
pub trait Transport {
    fn post_json(&self, url: &str, body: String) -> Result<String, Error>;
}

/// Blocking HTTP transport authenticating with a bearer token.
pub struct UreqTransport {
    agent: ureq::Agent,
    authorization: String,
}

impl UreqTransport {
    pub fn new(token: &str) -> Result<Self, Error> {
        if token.is_empty() {
            return Err(Error::BadConfigurationError("Missing api token".into()));
        }

        Ok(Self {
            agent: ureq::Agent::new(),
            authorization: format!("Bearer {}", token),
        })
    }
}

impl Transport for UreqTransport {
    fn post_json(&self, url: &str, body: String) -> Result<String, Error> {
        tracing::trace!("POST {} {}", url, body);

        let response = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .set("Authorization", &self.authorization)
            .send_string(&body);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let text = format!("{} {}", status, response.status_text());
                let detail = response
                    .into_string()
                    .ok()
                    .and_then(|body| serde_json::from_str::<ApiErrorBody>(&body).ok())
                    .map(|body| body.error.message);

                tracing::warn!("{} answered {}", url, text);
                return Err(match detail {
                    Some(message) => Error::ApiError(format!("{}: {}", text, message)),
                    None => Error::ApiError(text),
                });
            }
            Err(e) => return Err(Error::NetworkError(e.to_string())),
        };

        let body = response
            .into_string()
            .map_err(|e| Error::NetworkError(e.to_string()))?;
        tracing::trace!("response {}", body);
        Ok(body)
    }
}

pub struct Client<T = UreqTransport> {
    transport: T,
    base_uri: String,
}

impl Client<UreqTransport> {
    /// Creates a new `Client` over the blocking HTTP transport.
    ///
    /// The request goes to `config.base_url` and authenticates with
    /// `config.api_key` as a bearer token.
    ///
    /// # Arguments
    ///
    /// * `config`: The resolved connection settings.
    ///
    /// # Returns
    ///
    /// A `Result` containing the new `Client` instance, or an
    /// `Error::BadConfigurationError` if the API key or base URI is empty.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let transport = UreqTransport::new(&config.api_key)?;
        Self::with_transport(&config.base_url, transport)
    }
}

impl<T: Transport> Client<T> {
    /// Creates a new `Client` over any transport.
    ///
    /// Trailing slashes on `base_uri` are dropped, so `.../v1` and `.../v1/`
    /// address the same endpoints.
    ///
    /// # Arguments
    ///
    /// * `base_uri`: The base URI of the API, e.g. `http://localhost:7099/v1/`.
    /// * `transport`: Carries the JSON bodies to and from the endpoint.
    ///
    /// # Returns
    ///
    /// A `Result` containing the new `Client` instance, or an
    /// `Error::BadConfigurationError` if `base_uri` is empty.
    pub fn with_transport(base_uri: &str, transport: T) -> Result<Self, Error> {
        let base_uri = base_uri.trim_end_matches('/');
        if base_uri.is_empty() {
            return Err(Error::BadConfigurationError("No base URI given".into()));
        }

        Ok(Self {
            transport,
            base_uri: base_uri.to_string(),
        })
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_uri)
    }

    /// Sends a request to the API to generate a completion for a chat
    /// conversation, blocking until the whole reply has arrived.
    ///
    /// # Arguments
    ///
    /// * `request`: The `ChatCompletions` struct containing the conversation
    ///   and model.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `ChatCompletionsResponse`, or an `Error` if
    /// the request fails or the reply is not a chat completion.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use example_inference::{ChatCompletions, Client, Config};
    ///
    /// let config = Config::from_env();
    /// let client = Client::new(&config)?;
    ///
    /// let response = client.chat_completions(&ChatCompletions::greeting(&config.model))?;
    /// println!("{}", response.first_content()?);
    /// # Ok::<(), example_inference::Error>(())
    /// ```
    pub fn chat_completions(
        &self,
        request: &ChatCompletions,
    ) -> Result<ChatCompletionsResponse, Error> {
        let url = self.chat_completions_url();
        tracing::debug!("requesting completion from {} with model {}", url, request.model);

        let body = serde_json::to_string(request).map_err(Error::SerializationError)?;
        let response = self.transport.post_json(&url, body)?;

        serde_json::from_str(&response).map_err(Error::DeserializationError)
    }
}

/// Sends the greeting conversation for `model` and writes the first choice's
/// text to `out`, followed by a newline. Nothing is written unless the
/// request succeeds.
pub fn run<T, W>(client: &Client<T>, model: &str, out: &mut W) -> Result<(), Error>
where
    T: Transport,
    W: Write,
{
    let request = ChatCompletions::greeting(model);

    let response = client.chat_completions(&request)?;
    let content = response.first_content()?;

    writeln!(out, "{}", content).map_err(Error::OutputError)?;
    out.flush().map_err(Error::OutputError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_BASE_URL, DEFAULT_MODEL};
    use std::cell::RefCell;

    struct MockTransport {
        reply: fn() -> Result<String, Error>,
        seen: RefCell<Vec<(String, String)>>,
    }

    impl MockTransport {
        fn new(reply: fn() -> Result<String, Error>) -> Self {
            Self {
                reply,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Transport for &MockTransport {
        fn post_json(&self, url: &str, body: String) -> Result<String, Error> {
            self.seen.borrow_mut().push((url.to_string(), body));
            (self.reply)()
        }
    }

    fn hello() -> Result<String, Error> {
        Ok(r#"{"choices":[{"message":{"content":"Hello!"}}]}"#.to_string())
    }

    fn refused() -> Result<String, Error> {
        Err(Error::NetworkError("Connection refused".into()))
    }

    fn client(transport: &MockTransport) -> Client<&MockTransport> {
        Client::with_transport(DEFAULT_BASE_URL, transport).unwrap()
    }

    #[test]
    fn prints_first_choice() -> Result<(), Error> {
        let transport = MockTransport::new(hello);
        let mut out = Vec::new();

        run(&client(&transport), DEFAULT_MODEL, &mut out)?;

        assert_eq!(String::from_utf8_lossy(&out), "Hello!\n");
        Ok(())
    }

    #[test]
    fn request_carries_single_system_message_and_model() -> Result<(), Error> {
        let transport = MockTransport::new(hello);
        let mut out = Vec::new();

        run(&client(&transport), "gpt-test", &mut out)?;

        let seen = transport.seen.borrow();
        assert_eq!(seen.len(), 1);

        let (url, body) = &seen[0];
        assert_eq!(url, "http://localhost:7099/v1/chat/completions");

        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-test",
                "messages": [{"role": "system", "content": "You are a helpful assistant."}],
            })
        );
        Ok(())
    }

    #[test]
    fn connection_error_propagates_without_output() {
        let transport = MockTransport::new(refused);
        let mut out = Vec::new();

        let result = run(&client(&transport), DEFAULT_MODEL, &mut out);

        assert!(matches!(result, Err(Error::NetworkError(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn no_choices_is_an_error() {
        fn empty() -> Result<String, Error> {
            Ok(r#"{"id":"x","choices":[]}"#.to_string())
        }
        let transport = MockTransport::new(empty);
        let mut out = Vec::new();

        let result = run(&client(&transport), DEFAULT_MODEL, &mut out);

        assert!(matches!(result, Err(Error::EmptyResponse)));
        assert!(out.is_empty());
    }

    #[test]
    fn malformed_body_is_a_deserialization_error() {
        fn garbage() -> Result<String, Error> {
            Ok("<html>bad gateway</html>".to_string())
        }
        let transport = MockTransport::new(garbage);

        let result = run(&client(&transport), DEFAULT_MODEL, &mut Vec::<u8>::new());

        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn full_openai_response_is_accepted() -> Result<(), Error> {
        let body = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "llama4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
        }"#;

        let response: ChatCompletionsResponse =
            serde_json::from_str(body).map_err(Error::DeserializationError)?;

        assert_eq!(response.first_content()?, "Hi there");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.model.as_deref(), Some("llama4"));
        Ok(())
    }

    #[test]
    fn null_content_reads_as_empty() -> Result<(), Error> {
        let response: ChatCompletionsResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .map_err(Error::DeserializationError)?;

        assert_eq!(response.first_content()?, "");
        Ok(())
    }

    #[test]
    fn base_uri_slashes_are_normalized() -> Result<(), Error> {
        let transport = MockTransport::new(hello);

        let with_slash = Client::with_transport("http://host/v1/", &transport)?;
        let without_slash = Client::with_transport("http://host/v1", &transport)?;

        assert_eq!(with_slash.chat_completions_url(), "http://host/v1/chat/completions");
        assert_eq!(without_slash.chat_completions_url(), "http://host/v1/chat/completions");
        Ok(())
    }

    #[test]
    fn client_from_config_targets_configured_endpoint() -> Result<(), Error> {
        let client = Client::new(&Config::default())?;

        assert_eq!(
            client.chat_completions_url(),
            "http://localhost:7099/v1/chat/completions"
        );
        Ok(())
    }

    #[test]
    fn empty_base_uri_is_rejected() {
        let transport = MockTransport::new(hello);

        let result = Client::with_transport("/", &transport);

        assert!(matches!(result, Err(Error::BadConfigurationError(_))));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            UreqTransport::new(""),
            Err(Error::BadConfigurationError(_))
        ));
    }
}
