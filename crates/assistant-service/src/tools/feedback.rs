use crate::registry::{tool_error, DeviceRpc, FunctionDeclaration, Registration, Schema, ToolContext};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct FeedbackInput {
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub include_thread: bool,
}

pub fn registration() -> Registration {
    Registration::action(
        FunctionDeclaration::new(
            "send_feedback",
            "Send feedback to the developers. Include the thread if you want to provide context for the feedback. \
             Only call this if the user specifically asks to send feedback. Feedback text is optional but \
             recommended if include_thread is true.",
            Schema::object()
                .property("feedback", Schema::string("The feedback to send to the developers."))
                .required_property(
                    "include_thread",
                    Schema::boolean("Whether to include the thread as context in the feedback."),
                ),
        ),
        send_feedback,
        |input: &FeedbackInput| {
            match (input.include_thread, input.feedback.is_empty()) {
                (true, false) => "Sending conversation with feedback...",
                (true, true) => "Sending conversation...",
                (false, false) => "Sending feedback...",
                (false, true) => "Doing nothing productive...",
            }
            .to_string()
        },
    )
    .capability("send_feedback")
}

async fn send_feedback(ctx: ToolContext, input: FeedbackInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("send_feedback") {
        return tool_error("You need to update the app on your watch to send feedback.");
    }
    if !input.include_thread && input.feedback.is_empty() {
        return tool_error("You need either set include_thread = true or include some feedback from the user.");
    }
    let mut request = json!({"action": "send_feedback", "feedback": input.feedback});
    if input.include_thread {
        request["thread_id"] = json!(ctx.thread_id);
    }
    info!("Asking phone to send feedback...");
    rpc.call(request).await
}

#[cfg(test)]
mod tests {
    use crate::tools::{default_registry, test_context};
    use crate::transport::testing::ScriptedTransport;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_thread_id_is_attached_on_request() {
        let registry = default_registry();
        let ctx = test_context(&["send_feedback"]);
        let transport = ScriptedTransport::with_replies(vec![r#"{"status":"ok"}"#]);

        registry
            .call_action(&ctx, "send_feedback", r#"{"feedback": "Great", "include_thread": true}"#, &transport)
            .await
            .unwrap();

        let sent: Value = serde_json::from_str(&transport.sent()[0][1..]).unwrap();
        assert_eq!(
            sent,
            json!({"action": "send_feedback", "feedback": "Great", "thread_id": ctx.thread_id})
        );
    }

    #[tokio::test]
    async fn test_empty_feedback_is_refused() {
        let registry = default_registry();
        let ctx = test_context(&["send_feedback"]);
        let transport = ScriptedTransport::with_replies(vec![]);

        let result = registry
            .call_action(&ctx, "send_feedback", r#"{"include_thread": false}"#, &transport)
            .await
            .unwrap();

        assert!(result["error"].as_str().unwrap().contains("include_thread"));
        assert!(transport.sent().is_empty());
    }
}
