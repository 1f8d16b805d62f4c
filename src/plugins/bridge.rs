//! Registers a plugin's handlers with a client and takes them away again

use crate::application::messaging::RegisteredHandler;
use crate::domain::traits::Client;
use crate::infrastructure::plugins::PluginElementCollection;

/// Register every handler the plugin declared for this client's context,
/// including those contributed by controllers. Returns the number added.
pub fn attach(plugin: &str, collection: &PluginElementCollection, client: &dyn Client) -> usize {
    let context = client.context();
    let mut added = 0;

    for entry in collection.handlers_for(context) {
        client.add_handler(RegisteredHandler::owned_by(entry.handler.clone(), plugin), entry.group);
        added += 1;
    }

    for controller in collection.controllers_for(context) {
        let entries = controller.handlers();
        tracing::debug!(
            "Controller {} of {} contributes {} handlers to {}",
            controller.name(),
            plugin,
            entries.len(),
            context
        );
        for entry in entries {
            client.add_handler(RegisteredHandler::owned_by(entry.handler, plugin), entry.group);
            added += 1;
        }
    }

    if added > 0 {
        tracing::info!("Attached {} handlers of {} to the {} client", added, plugin, context);
    }
    added
}

/// Remove every handler owned by the plugin from every group
pub fn detach(plugin: &str, client: &dyn Client) -> usize {
    let removed = client.dispatcher().remove_owned(plugin);
    if removed > 0 {
        tracing::info!("Detached {} handlers of {} from the {} client", removed, plugin, client.context());
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::BotError;
    use crate::application::messaging::Dispatcher;
    use crate::domain::entities::Message;
    use crate::domain::traits::{ClientContext, Handler, HandlerResult};
    use crate::plugins::{Controller, HandlerEntry, PluginElements};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Echo(&'static str);

    #[async_trait]
    impl Handler for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn matches(&self, _message: &Message) -> bool {
            true
        }

        async fn handle(&self, _message: &Message) -> HandlerResult {
            Ok(Some(self.0.to_string()))
        }
    }

    struct Panel;

    impl Controller for Panel {
        fn name(&self) -> &str {
            "panel"
        }

        fn handlers(&self) -> Vec<HandlerEntry> {
            vec![
                HandlerEntry::new(Arc::new(Echo("panel-a")), 3),
                HandlerEntry::new(Arc::new(Echo("panel-b")), 4),
            ]
        }
    }

    struct FakeClient {
        context: ClientContext,
        dispatcher: Dispatcher,
    }

    impl FakeClient {
        fn new(context: ClientContext) -> Self {
            Self {
                context,
                dispatcher: Dispatcher::new(),
            }
        }
    }

    #[async_trait]
    impl Client for FakeClient {
        fn context(&self) -> ClientContext {
            self.context
        }

        async fn start(&self) -> Result<(), BotError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), BotError> {
            Ok(())
        }

        async fn send_message(&self, _chat_id: &str, _text: &str) -> Result<(), BotError> {
            Ok(())
        }

        fn dispatcher(&self) -> &Dispatcher {
            &self.dispatcher
        }
    }

    fn collection() -> PluginElementCollection {
        PluginElementCollection::classify(
            PluginElements::new()
                .user_handler(Arc::new(Echo("user")), 0)
                .assistant_handler(Arc::new(Echo("assistant")), 1)
                .controller(ClientContext::User, Arc::new(Panel)),
        )
    }

    #[test]
    fn test_attach_uses_client_context() {
        let user = FakeClient::new(ClientContext::User);
        let assistant = FakeClient::new(ClientContext::Assistant);
        let collection = collection();

        assert_eq!(attach("kibe", &collection, &user), 3);
        assert_eq!(attach("kibe", &collection, &assistant), 1);

        let groups: Vec<i32> = user.dispatcher().groups().into_iter().map(|(g, _)| g).collect();
        assert_eq!(groups, vec![0, 3, 4]);
        assert_eq!(assistant.dispatcher().count_owned("kibe"), 1);
    }

    #[test]
    fn test_detach_leaves_other_owners() {
        let user = FakeClient::new(ClientContext::User);
        let collection = collection();
        attach("kibe", &collection, &user);
        attach("other", &collection, &user);
        user.add_handler(RegisteredHandler::new(Arc::new(Echo("host"))), 0);

        assert_eq!(detach("kibe", &user), 3);
        assert_eq!(user.dispatcher().count_owned("kibe"), 0);
        assert_eq!(user.dispatcher().count_owned("other"), 3);
        assert_eq!(user.dispatcher().len(), 4);
        assert_eq!(detach("kibe", &user), 0);
    }
}
