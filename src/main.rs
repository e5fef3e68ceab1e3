// Demo binary: one "arena" land type behind the WebSocket front end.

use land_server::domain::ids::PlayerId;
use land_server::domain::state::LandState;
use land_server::domain::value::{SnapshotValue, ValueMap};
use land_server::frameworks::{config, server};
use land_server::interface_adapters::codec::{TransportCodec, WireEncoding};
use land_server::use_cases::keeper::KeeperSettings;
use land_server::use_cases::{
    AdapterSettings, LandConfig, LandDefinition, LandRealm, LandRouter, LandServices,
    ManagedLandServer, RouterConfig, RuleError,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct ArenaState {
    round: i64,
    scores: BTreeMap<String, i64>,
    mail: BTreeMap<String, Vec<String>>,
}

impl LandState for ArenaState {
    fn project_broadcast(&self) -> ValueMap {
        ValueMap::from([
            ("round".to_string(), SnapshotValue::Int(self.round)),
            (
                "scores".to_string(),
                SnapshotValue::Object(
                    self.scores
                        .iter()
                        .map(|(player, score)| (player.clone(), SnapshotValue::Int(*score)))
                        .collect(),
                ),
            ),
        ])
    }

    fn project_player(&self, player: &PlayerId) -> ValueMap {
        let mine = self
            .mail
            .get(player.as_str())
            .map(|messages| {
                SnapshotValue::Array(
                    messages
                        .iter()
                        .map(|text| SnapshotValue::from(text.as_str()))
                        .collect(),
                )
            })
            .unwrap_or(SnapshotValue::Array(Vec::new()));
        ValueMap::from([("mail".to_string(), mine)])
    }
}

fn arena_definition() -> LandDefinition<ArenaState> {
    LandDefinition::<ArenaState>::new("arena")
        .with_on_join(|state, ctx| {
            state.scores.entry(ctx.player_id.to_string()).or_insert(0);
            Ok(())
        })
        .with_on_leave(|state, ctx| {
            state.scores.remove(ctx.player_id.as_str());
            state.mail.remove(ctx.player_id.as_str());
            Ok(())
        })
        .with_action("score.add", |state, payload, ctx| {
            let amount = payload
                .get("amount")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| RuleError::new("amount_required"))?;
            let entry = state.scores.entry(ctx.player_id.to_string()).or_insert(0);
            *entry += amount;
            Ok(json!({"total": *entry}))
        })
        .with_action("round.next", |state, _payload, _ctx| {
            state.round += 1;
            Ok(json!({"round": state.round}))
        })
        .with_event("mail.send", |state, payload, _ctx| {
            let to = payload
                .get("to")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| RuleError::new("recipient_required"))?;
            let text = payload
                .get("text")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            state.mail.entry(to.to_string()).or_default().push(text.to_string());
            Ok(())
        })
}

#[tokio::main]
async fn main() {
    let codec = Arc::new(TransportCodec::new(WireEncoding::JsonObject));
    let land_config = LandConfig {
        path_hasher: None,
        keeper: KeeperSettings {
            destroy_when_empty: config::empty_destroy_interval(),
            mailbox_capacity: config::MAILBOX_CAPACITY,
        },
        adapter: AdapterSettings {
            parallel_send: config::parallel_send_enabled(codec.encoding()),
        },
        codec,
    };

    let realm = Arc::new(LandRealm::new());
    realm
        .register(Arc::new(ManagedLandServer::new(
            arena_definition(),
            ArenaState::default,
            LandServices::new(),
            land_config,
        )))
        .await
        .expect("arena land type should register");

    let router = Arc::new(LandRouter::new(
        Arc::clone(&realm),
        RouterConfig::default(),
    ));

    if let Err(e) = server::run_with_config(realm, router).await {
        tracing::error!(error = %e, "server exited");
    }
}
