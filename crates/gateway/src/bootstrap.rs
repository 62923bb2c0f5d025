//! Process bootstrap: explicit construction of every long-lived resource
//! in dependency order. Shutdown is the reverse: the server drains
//! connections, then stores flush via Drop.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;

use mnemon_analysis::{FingerprintGenerator, TouchstoneGenerator};
use mnemon_bus::{EventBus, EventPayload};
use mnemon_continuum::ContinuumRepository;
use mnemon_domain::config::Config;
use mnemon_embeddings::EmbeddingsClient;
use mnemon_kv::KvStore;
use mnemon_memory::{log as retrieval_log, KnowledgeStore, MemoryStore, RetrievalEngine};
use mnemon_providers::{FailoverState, LlmProvider};
use mnemon_working_memory::{
    DeferredResults, DeferredResultsTrinket, DomainKnowledgeTrinket, ManifestTrinket,
    ProactiveMemoryTrinket, ReminderSurface, ReminderTrinket, WorkingMemory,
};

use crate::auth::AuthVerifier;
use crate::runtime::continuum_pool::ContinuumPool;
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::tools::{SetReminderTool, ToolRegistry};
use crate::runtime::user_lock::UserRequestLock;
use crate::state::{AppState, ConnectionRegistry};

const DEFAULT_SYSTEM_PROMPT: &str = "You are Mnemon, an assistant with a long-term memory of \
     your conversations with this user. Answer naturally, drawing on what you remember.";

pub async fn build(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);

    // ── System prompt ─────────────────────────────────────────────
    let system_prompt = match std::fs::read_to_string(&config.server.system_prompt_path) {
        Ok(text) => text,
        Err(_) => {
            tracing::warn!(
                path = %config.server.system_prompt_path,
                "system prompt file not found, using built-in default"
            );
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    };

    // ── SQL substrate ─────────────────────────────────────────────
    if let Some(parent) = std::path::Path::new(&config.server.db_path).parent() {
        std::fs::create_dir_all(parent).context("creating database directory")?;
    }
    let conn = rusqlite::Connection::open(&config.server.db_path)
        .with_context(|| format!("opening database at {}", config.server.db_path))?;
    let db = Arc::new(Mutex::new(conn));
    retrieval_log::init_schema(&db.lock())
        .map_err(|e| anyhow::anyhow!("retrieval log schema: {e}"))?;

    // ── KV substrate ──────────────────────────────────────────────
    let kv = KvStore::connect(&config.kv.url)
        .await
        .map_err(|e| anyhow::anyhow!("connecting to KV store: {e}"))?;

    // ── Embeddings ────────────────────────────────────────────────
    let embeddings = Arc::new(
        EmbeddingsClient::new(&config.embeddings, Some(kv.clone()))
            .map_err(|e| anyhow::anyhow!("embeddings client: {e}"))?,
    );

    // ── Memory stores ─────────────────────────────────────────────
    let memory_store = Arc::new(
        MemoryStore::new(db.clone()).map_err(|e| anyhow::anyhow!("memory store: {e}"))?,
    );
    let retrieval = Arc::new(RetrievalEngine::new(
        memory_store.clone(),
        embeddings.clone(),
        config.retrieval.clone(),
    ));
    let knowledge = Arc::new(
        KnowledgeStore::new(db.clone(), config.knowledge.clone())
            .map_err(|e| anyhow::anyhow!("knowledge store: {e}"))?,
    );

    // ── Continuum persistence ─────────────────────────────────────
    let repository = Arc::new(
        ContinuumRepository::new(db.clone())
            .map_err(|e| anyhow::anyhow!("continuum repository: {e}"))?,
    );
    let pool = Arc::new(ContinuumPool::new(repository, config.continuum.clone()));

    // ── Provider (shared failover flag across main + analysis) ────
    let failover = Arc::new(FailoverState::new());
    let provider = Arc::new(
        LlmProvider::from_config(config.llm.clone(), failover)
            .map_err(|e| anyhow::anyhow!("LLM provider: {e}"))?,
    );

    // ── Event bus, working memory, trinkets ───────────────────────
    let bus = Arc::new(EventBus::new());
    let working_memory = WorkingMemory::new(bus.clone());

    let timezone: chrono_tz::Tz = config
        .server
        .timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown timezone '{}'", config.server.timezone))?;

    let reminders = Arc::new(ReminderSurface::default());
    let deferred = Arc::new(DeferredResults::default());
    let proactive = Arc::new(ProactiveMemoryTrinket::new());

    working_memory.register_trinket(Arc::new(ManifestTrinket));
    working_memory.register_trinket(Arc::new(DomainKnowledgeTrinket::new(knowledge.clone())));
    working_memory.register_trinket(proactive.clone());
    working_memory.register_trinket(Arc::new(ReminderTrinket::new(reminders.clone(), timezone)));
    working_memory.register_trinket(Arc::new(DeferredResultsTrinket::new(deferred.clone())));

    // Knowledge refresh batching reacts to completed turns.
    {
        let knowledge = knowledge.clone();
        bus.subscribe("TurnCompleted", move |event| {
            if let EventPayload::TurnCompleted { user_id, .. } = &event.payload {
                knowledge.note_turn_completed(user_id);
            }
            Ok(())
        });
    }

    // ── Tools ─────────────────────────────────────────────────────
    let registry = Arc::new(ToolRegistry::new(&config.llm.tool_loader_tool_name));
    registry.register(Arc::new(SetReminderTool::new(reminders.clone())), true);

    // ── Analysis generators ───────────────────────────────────────
    let touchstone_gen = Arc::new(
        TouchstoneGenerator::new(
            provider.clone(),
            embeddings.clone(),
            config.llm.analysis.clone(),
        )
        .map_err(|e| anyhow::anyhow!("touchstone generator: {e}"))?,
    );
    let fingerprint_gen = Arc::new(
        FingerprintGenerator::new(provider.clone(), config.llm.analysis.clone())
            .map_err(|e| anyhow::anyhow!("fingerprint generator: {e}"))?,
    );

    // ── Orchestrator ──────────────────────────────────────────────
    let orchestrator = Orchestrator::new(
        bus.clone(),
        provider,
        embeddings,
        retrieval,
        touchstone_gen,
        fingerprint_gen,
        proactive,
        registry,
        config.llm.tool_loader_tool_name.clone(),
    );

    // ── Session plumbing ──────────────────────────────────────────
    let auth = Arc::new(
        AuthVerifier::from_env(&config.server.auth_secret_env)
            .map_err(|e| anyhow::anyhow!("auth: {e}"))?,
    );
    let user_lock = Arc::new(UserRequestLock::new(kv.clone()));

    tracing::info!("bootstrap complete");
    Ok(AppState {
        config,
        system_prompt: Arc::new(system_prompt),
        db,
        pool,
        orchestrator,
        user_lock,
        auth,
        connections: Arc::new(ConnectionRegistry::default()),
    })
}
