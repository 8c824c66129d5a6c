use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kilofly_core::{
    ConversationId, CoreEvent, CoreRuntime, CountSnapshot, EventSink, IdentityProvider,
    InMemoryBackend, UserId,
};
use serde::Serialize;
use tokio::sync::mpsc;

use super::config::CliConfig;
use super::script::{Script, Step};

const DEFAULT_SETTLE_MS: u64 = 50;

/// Counts as they stood after the last step
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub user: Option<UserId>,
    pub active_packages: CountSnapshot,
    pub unread_conversations: CountSnapshot,
    pub conversations: BTreeMap<ConversationId, CountSnapshot>,
    pub events: usize,
}

/// Replay a script against an in-memory backend. Every core event is handed
/// to `on_event` as soon as the step that caused it has settled.
pub async fn run_script<F>(
    script: &Script,
    config: &CliConfig,
    mut on_event: F,
) -> Result<SimulationSummary>
where
    F: FnMut(&CoreEvent) -> Result<()>,
{
    let backend = Arc::new(InMemoryBackend::new());
    for (table, rows) in &script.seed {
        for row in rows {
            backend
                .insert(table, row.clone())
                .with_context(|| format!("Invalid seed row in {}", table))?;
        }
    }

    let identity = IdentityProvider::new();
    let (events, mut rx) = EventSink::channel();
    let mut runtime = CoreRuntime::new(backend.clone(), config.core.clone(), &identity, events);
    runtime.sync_identity().await;

    let settle = Duration::from_millis(config.settle_ms.unwrap_or(DEFAULT_SETTLE_MS));
    let mut emitted = 0;

    for (index, step) in script.steps.iter().enumerate() {
        tracing::debug!(index, ?step, "applying step");
        apply_step(&mut runtime, &backend, &identity, step)
            .await
            .with_context(|| format!("Step {} failed", index))?;
        tokio::time::sleep(settle).await;
        emitted += drain(&mut rx, &mut on_event)?;
    }

    let summary = SimulationSummary {
        user: runtime.user().cloned(),
        active_packages: runtime.active_packages().snapshot(),
        unread_conversations: runtime.unread_conversations().snapshot(),
        conversations: runtime
            .open_conversations()
            .filter_map(|id| {
                runtime
                    .conversation(id)
                    .map(|count| (id.clone(), count.snapshot()))
            })
            .collect(),
        events: emitted,
    };

    runtime.shutdown().await;
    let events = emitted + drain(&mut rx, &mut on_event)?;
    Ok(SimulationSummary { events, ..summary })
}

async fn apply_step(
    runtime: &mut CoreRuntime<InMemoryBackend>,
    backend: &InMemoryBackend,
    identity: &IdentityProvider,
    step: &Step,
) -> Result<()> {
    match step {
        Step::SignIn { user } => {
            identity.sign_in(UserId::from(user.as_str()));
            runtime.sync_identity().await;
        }
        Step::SignOut => {
            identity.sign_out();
            runtime.sync_identity().await;
        }
        Step::Insert { table, row } => {
            let id = backend.insert(table, row.clone())?;
            tracing::debug!(%table, %id, "row inserted");
        }
        Step::Update { table, id, patch } => {
            if !backend.update(table, id, patch.clone())? {
                tracing::warn!(%table, %id, "update of unknown row ignored");
            }
        }
        Step::Delete { table, id } => {
            if !backend.delete(table, id) {
                tracing::warn!(%table, %id, "delete of unknown row ignored");
            }
        }
        Step::OpenConversation { conversation } => {
            runtime
                .open_conversation(ConversationId::from(conversation.as_str()))
                .await;
        }
        Step::CloseConversation { conversation } => {
            let id = ConversationId::from(conversation.as_str());
            if !runtime.close_conversation(&id).await {
                tracing::warn!(%id, "conversation was not open");
            }
        }
        Step::TrustScore { score } => {
            runtime.observe_trust_score(*score);
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        Step::DropStreams => backend.drop_subscriptions(),
    }
    Ok(())
}

fn drain<F>(rx: &mut mpsc::UnboundedReceiver<CoreEvent>, on_event: &mut F) -> Result<usize>
where
    F: FnMut(&CoreEvent) -> Result<()>,
{
    let mut n = 0;
    while let Ok(event) = rx.try_recv() {
        on_event(&event)?;
        n += 1;
    }
    Ok(n)
}

/// Print one value as a JSON line on stdout
pub fn print_event<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let line = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", line);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kilofly_core::TrustLevel;

    fn script(json: &str) -> Script {
        Script::from_json(json).unwrap()
    }

    async fn collect(script: &Script) -> (Vec<CoreEvent>, SimulationSummary) {
        let mut events = Vec::new();
        let summary = run_script(script, &CliConfig::default(), |event| {
            events.push(event.clone());
            Ok(())
        })
        .await
        .unwrap();
        (events, summary)
    }

    #[tokio::test(start_paused = true)]
    async fn test_package_arrival_scenario() {
        let script = script(
            r#"{
                "seed": {"packages": [{"id": "p1", "user_id": "alice", "status": "pending"}]},
                "steps": [
                    {"step": "sign_in", "user": "alice"},
                    {"step": "insert", "table": "packages", "row": {"user_id": "alice", "status": "accepted"}},
                    {"step": "wait", "ms": 3000},
                    {"step": "update", "table": "packages", "id": "p1", "patch": {"status": "delivered"}}
                ]
            }"#,
        );
        let (events, summary) = collect(&script).await;

        let values: Vec<u64> = events
            .iter()
            .filter_map(|event| match event {
                CoreEvent::CountChanged {
                    kind: kilofly_core::CountKind::ActivePackages,
                    value,
                    ..
                } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![1, 2, 1]);

        let arrivals = events
            .iter()
            .filter(|event| matches!(event, CoreEvent::NewArrival { value: 2, .. }))
            .count();
        assert_eq!(arrivals, 1);

        assert_eq!(summary.user, Some(UserId::from("alice")));
        assert_eq!(summary.active_packages.value, 1);
        assert!(!summary.active_packages.has_new_arrival);
        assert_eq!(summary.events, events.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_and_trust_scenario() {
        let script = script(
            r#"{
                "seed": {"messages": [
                    {"id": "m1", "conversation_id": "c1", "sender_id": "bob", "recipient_id": "alice", "read": false},
                    {"id": "m2", "conversation_id": "c1", "sender_id": "bob", "recipient_id": "alice", "read": false}
                ]},
                "steps": [
                    {"step": "sign_in", "user": "alice"},
                    {"step": "open_conversation", "conversation": "c1"},
                    {"step": "update", "table": "messages", "id": "m1", "patch": {"read": true}},
                    {"step": "trust_score", "score": 45},
                    {"step": "trust_score", "score": 62}
                ]
            }"#,
        );
        let (events, summary) = collect(&script).await;

        assert_eq!(summary.unread_conversations.value, 1);
        assert_eq!(summary.conversations[&ConversationId::from("c1")].value, 1);
        assert!(events.iter().any(|event| matches!(
            event,
            CoreEvent::TrustLevelUp {
                from: TrustLevel::Argent,
                to: TrustLevel::Or,
                score: 62
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_zeroes_counts() {
        let script = script(
            r#"{
                "seed": {"packages": [{"user_id": "alice", "status": "in_transit"}]},
                "steps": [
                    {"step": "sign_in", "user": "alice"},
                    {"step": "sign_out"}
                ]
            }"#,
        );
        let (_, summary) = collect(&script).await;
        assert_eq!(summary.user, None);
        assert_eq!(summary.active_packages.value, 0);
        assert_eq!(summary.unread_conversations.value, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_dropped_streams() {
        let script = script(
            r#"{
                "steps": [
                    {"step": "sign_in", "user": "alice"},
                    {"step": "drop_streams"},
                    {"step": "wait", "ms": 1000},
                    {"step": "insert", "table": "packages", "row": {"user_id": "alice", "status": "pending"}}
                ]
            }"#,
        );
        let (_, summary) = collect(&script).await;
        assert_eq!(summary.active_packages.value, 1);
        assert!(!summary.active_packages.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_aborts_run() {
        let script = script(
            r#"{
                "seed": {"packages": [{"user_id": "alice", "status": "pending"}]},
                "steps": [{"step": "sign_in", "user": "alice"}]
            }"#,
        );
        let result = run_script(&script, &CliConfig::default(), |_| {
            anyhow::bail!("stdout closed")
        })
        .await;
        assert!(result.is_err());
    }
}
