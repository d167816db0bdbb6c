use crate::client::config::Config;
use crate::client::consts::{API_KEY_HEADER, CONVERSATION_PATH};
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!(
        "{}/{}?agent_id={}",
        config.base_url(),
        CONVERSATION_PATH,
        urlencoding::encode(config.agent_id())
    )
    .into_client_request()?;
    if let Some(api_key) = config.api_key() {
        request
            .headers_mut()
            .insert(API_KEY_HEADER, api_key.expose_secret().parse()?);
    }
    Ok(request)
}
