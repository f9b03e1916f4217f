//! Lark callback classification.
//!
//! Every request to `/webhook/lark` is classified exactly once into a
//! [`LarkCallback`] and then matched exhaustively by the handler. The
//! precedence is fixed: challenge handshake, then OAuth redirect, then card
//! action. OAuth redirects are browser `GET`s, so a request with a body never
//! classifies as one.

use serde::Deserialize;
use serde_json::Value;

/// Event type prefix of interactive card callbacks (schema 2.0).
const CARD_ACTION_EVENT: &str = "card.action.trigger";

/// Query string accepted on `/webhook/lark`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct LarkQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// A button press (or other interaction) on an interactive card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAction {
    /// `value.action` of the pressed element, when it is a string.
    pub action: Option<String>,
    /// Card token used to update the card in place.
    pub card_token: Option<String>,
    /// Open id of the user who pressed the button.
    pub operator_open_id: Option<String>,
}

impl CardAction {
    /// Whether this is the action the gateway handles locally.
    pub fn is(&self, identifier: &str) -> bool {
        self.action.as_deref() == Some(identifier)
    }
}

/// The shape of one inbound Lark request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LarkCallback {
    /// Endpoint ownership proof: echo `challenge` back.
    Challenge {
        challenge: Value,
        token: Option<String>,
    },
    /// Browser redirect after the user authorised the app.
    OAuthRedirect { code: String, state: Option<String> },
    CardAction(CardAction),
    /// Valid JSON we have no handler for.
    Unhandled,
}

/// Classifies a request from its query string and parsed body.
///
/// `GET` requests pass `None` for the body. A `code` in the query only counts
/// for those; on a `POST` it is ignored and the body decides.
pub fn classify(query: &LarkQuery, body: Option<&Value>) -> LarkCallback {
    if let Some(challenge) = body.and_then(|b| b.get("challenge")) {
        let token = body
            .and_then(|b| b.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return LarkCallback::Challenge {
            challenge: challenge.clone(),
            token,
        };
    }

    let Some(body) = body else {
        return match query.code.as_deref().filter(|c| !c.is_empty()) {
            Some(code) => LarkCallback::OAuthRedirect {
                code: code.to_string(),
                state: query.state.clone(),
            },
            None => LarkCallback::Unhandled,
        };
    };

    match card_action(body) {
        Some(action) => LarkCallback::CardAction(action),
        None => LarkCallback::Unhandled,
    }
}

/// Extracts a card action from either callback schema.
///
/// Schema 2.0 wraps the action in `event` and names the event type in
/// `header.event_type`; the older schema puts `action` at the top level.
fn card_action(body: &Value) -> Option<CardAction> {
    let event_type = body["header"]["event_type"].as_str().unwrap_or_default();

    let event = if event_type.starts_with(CARD_ACTION_EVENT) {
        &body["event"]
    } else if body["action"].is_object() {
        body
    } else {
        return None;
    };

    let as_string = |v: &Value| v.as_str().map(str::to_string);
    Some(CardAction {
        action: as_string(&event["action"]["value"]["action"]),
        card_token: as_string(&event["token"]),
        operator_open_id: as_string(&event["operator"]["open_id"])
            .or_else(|| as_string(&event["open_id"])),
    })
}
