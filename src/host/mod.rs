//! Skill host
//!
//! Glue between a [`ConnectionClient`] and an [`IntentRouter`]. The host
//! installs itself as the connection's observer, dispatches every message
//! arriving on the intent endpoint and answers on the reply endpoint with
//! the combined result. Everything else is passed on to an optional
//! delegate observer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::connection::{ConnectionClient, ConnectionObserver, WeakConnectionClient};
use crate::routing::IntentRouter;
use crate::value_objects::{Message, ResolvedIntentResponse};

/// Payload sent back for every intent message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentReply {
    /// Correlation id of the intent message being answered
    pub request_id: Option<String>,
    pub matched: bool,
    pub response: Option<ResolvedIntentResponse>,
}

/// Routes intent messages from a connection to skill handlers
pub struct SkillHost {
    this: Weak<SkillHost>,
    client: WeakConnectionClient,
    router: Arc<IntentRouter>,
    intent_endpoint: String,
    reply_endpoint: String,
    delegate: Option<Arc<dyn ConnectionObserver>>,
}

impl SkillHost {
    /// Install a host on `client`, replacing its observer
    ///
    /// Endpoints come from the client's configuration.
    pub fn attach(client: &ConnectionClient, router: Arc<IntentRouter>) -> Arc<Self> {
        Self::attach_with_delegate(client, router, None)
    }

    /// Like [`SkillHost::attach`], forwarding non-intent traffic to `delegate`
    pub fn attach_with_delegate(
        client: &ConnectionClient,
        router: Arc<IntentRouter>,
        delegate: Option<Arc<dyn ConnectionObserver>>,
    ) -> Arc<Self> {
        let host = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            client: client.downgrade(),
            router,
            intent_endpoint: client.config().intent_endpoint.clone(),
            reply_endpoint: client.config().reply_endpoint.clone(),
            delegate,
        });
        client.set_observer(host.clone());
        debug!(
            "Skill host attached to {} ({} -> {})",
            client.id(),
            host.intent_endpoint,
            host.reply_endpoint
        );
        host
    }

    pub fn router(&self) -> &Arc<IntentRouter> {
        &self.router
    }

    /// Dispatch one intent message and build the reply
    pub async fn answer(&self, message: &Message) -> IntentReply {
        let request_id = message.request_id.clone();
        match self.router.handle(message.payload_value()).await {
            Ok(result) => IntentReply {
                request_id,
                matched: result.matched,
                response: result.response.map(|response| response.resolve_random()),
            },
            Err(e) => {
                warn!("Rejected intent message: {}", e);
                IntentReply {
                    request_id,
                    ..IntentReply::default()
                }
            }
        }
    }

    fn spawn_answer(self: Arc<Self>, message: Message) {
        tokio::spawn(async move {
            let reply = self.answer(&message).await;
            let Some(client) = self.client.upgrade() else {
                debug!("Connection gone, dropping reply");
                return;
            };
            let payload = match serde_json::to_value(&reply) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to encode reply: {}", e);
                    Value::Null
                }
            };
            if client.send(&self.reply_endpoint, payload).is_none() {
                warn!("Reply on {} dropped, connection not open", self.reply_endpoint);
            }
        });
    }
}

impl ConnectionObserver for SkillHost {
    fn on_open(&self) {
        if let Some(delegate) = &self.delegate {
            delegate.on_open();
        }
    }

    fn on_close(&self, code: Option<u16>) {
        if let Some(delegate) = &self.delegate {
            delegate.on_close(code);
        }
    }

    fn on_control(&self, message: &Message) {
        if let Some(delegate) = &self.delegate {
            delegate.on_control(message);
        }
    }

    fn on_message(&self, message: &Message) {
        if message.endpoint.as_deref() == Some(self.intent_endpoint.as_str()) {
            if let Some(host) = self.this.upgrade() {
                host.spawn_answer(message.clone());
            }
        } else if let Some(delegate) = &self.delegate {
            delegate.on_message(message);
        }
    }
}

impl std::fmt::Debug for SkillHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillHost")
            .field("intent_endpoint", &self.intent_endpoint)
            .field("reply_endpoint", &self.reply_endpoint)
            .field("delegate", &self.delegate.is_some())
            .finish()
    }
}
