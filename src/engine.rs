//! # Orchestration
//!
//! [`SupportEngine`] wires the whole pipeline together: store → index →
//! matcher → formatter → recommender, with an OpenAI-compatible chat client
//! for narration and for queries nothing matches.
//!
//! A matched query is answered from the store — verbatim by default, or
//! narrated by the model when `narrate: true`, in which case the prompt
//! forbids altering step text. An unmatched query goes to the model with a
//! clarification-oriented prompt; short or hesitant queries additionally ask
//! the model to offer a menu of options. If the model call itself fails the
//! user gets a plain apology rather than an error dump.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, Role,
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{info, warn};

use crate::analytics::{AnalyticsStore, spawn_recorder};
use crate::config::ProcwiseConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::formatter;
use crate::history::History;
use crate::index::ProcessIndex;
use crate::matcher::Matcher;
use crate::procedure::Procedure;
use crate::recommend::{Recommender, RelationshipTable};
use crate::store::ProcedureStore;
use crate::template::ChatTemplate;

const APOLOGY: &str = "Sorry, I'm having trouble answering right now. Please try again in a \
moment, or ask me about a specific Assetflow task like uploading or searching for assets.";

const VERBATIM_INSTRUCTION: &str = "Below is the official process guide for the user's task. \
Walk the user through it warmly. You must reproduce every step exactly, word for word, in its \
original order. Never merge, drop, renumber or reword a step. You may add a one-sentence \
introduction before the steps and a short closing line after them, nothing else.";

const CLARIFY_INSTRUCTION: &str = "The user's question did not match any known Assetflow \
process guide. Answer helpfully from general knowledge of digital asset management, and ask \
one clarifying question that would help identify the task they are trying to do.";

const MENU_INSTRUCTION: &str = "The user seems unsure what they need. Offer a short menu of \
common Assetflow tasks (uploading, searching, tagging, sharing, managing collections) and ask \
which one fits.";

/// Words and phrases that signal the user does not know what to ask for.
const UNCERTAINTY_MARKERS: &[&str] = &[
    "not sure",
    "don't know",
    "dont know",
    "no idea",
    "confused",
    "unsure",
    "lost",
    "help me",
    "what can",
];

pub struct SupportEngine {
    config: ProcwiseConfig,
    store: Arc<ProcedureStore>,
    index: Arc<RwLock<ProcessIndex>>,
    matcher: Matcher,
    recommender: Recommender,
    template: ChatTemplate,
    client: Client<OpenAIConfig>,
    history: Mutex<History>,
    reload_lock: Mutex<()>,
    analytics: Option<Arc<StdMutex<AnalyticsStore>>>,
}

impl SupportEngine {
    /// Build the full pipeline from config. Loads the store eagerly; an
    /// unreadable processes directory is a startup error. An unusable
    /// analytics database only costs the stats, never the assistant.
    pub fn new(config: ProcwiseConfig, template: ChatTemplate) -> Result<Self> {
        let store = Arc::new(ProcedureStore::new(&config.processes_dir));
        let loaded = store.reload()?;
        info!(count = loaded, "loaded process definitions");

        let embedder = EmbeddingClient::new(
            &config.api_base,
            &config.api_key,
            &config.embedding_model,
            Duration::from_secs(config.embed_timeout_secs),
        )?;
        let index = Arc::new(RwLock::new(ProcessIndex::open(
            embedder,
            config.index_dir.clone(),
            "procwise",
        )));

        let analytics = match AnalyticsStore::open(&config.analytics_db_url) {
            Ok(store) => Some(Arc::new(StdMutex::new(store))),
            Err(err) => {
                warn!(%err, "analytics unavailable, matches will not be recorded");
                None
            }
        };
        let events = match &analytics {
            Some(store) => spawn_recorder(Arc::clone(store)),
            // no recorder: events go to a closed channel and are dropped
            None => mpsc::unbounded_channel().0,
        };

        let table = match &config.relationships_path {
            Some(path) => RelationshipTable::load_or_default(path),
            None => RelationshipTable::default(),
        };

        let matcher = Matcher::new(
            Arc::clone(&store),
            Arc::clone(&index),
            events,
            config.similarity_threshold,
            config.keyword_floor,
            config.stop_words.clone(),
        );
        let recommender = Recommender::new(
            Arc::clone(&store),
            Arc::clone(&index),
            table,
            analytics.clone(),
        );

        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(config.api_key.clone())
                .with_api_base(config.api_base.clone()),
        );
        let history = Mutex::new(History::new(config.history_max_tokens));

        Ok(Self {
            config,
            store,
            index,
            matcher,
            recommender,
            template,
            client,
            history,
            reload_lock: Mutex::new(()),
            analytics,
        })
    }

    /// Answer one user query.
    ///
    /// Never fails from the caller's point of view: model trouble is
    /// logged and turned into fallback text.
    pub async fn respond(&self, query: &str) -> String {
        let answer = match self.matcher.match_query(query).await {
            Some(result) => match self.store.get(&result.process_id) {
                Some(procedure) => self.answer_matched(&procedure).await,
                // definition disappeared between match and lookup (reload race)
                None => self.answer_unmatched(query).await,
            },
            None => self.answer_unmatched(query).await,
        };

        let mut history = self.history.lock().await;
        history.push(Role::User, query);
        history.push(Role::Assistant, answer.clone());
        answer
    }

    async fn answer_matched(&self, procedure: &Procedure) -> String {
        let guide = formatter::render(procedure);
        let mut answer = if self.config.narrate {
            match self.narrate(&guide).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "narration failed, returning the guide verbatim");
                    guide
                }
            }
        } else {
            guide
        };

        let recommendations = self.recommender.recommend(&procedure.id, 2).await;
        if !recommendations.is_empty() {
            answer.push_str("\n## What you might want to do next\n\n");
            for related in &recommendations {
                answer.push_str(&format!("- {} ({})\n", related.transition, related.reason));
            }
        }
        answer
    }

    async fn answer_unmatched(&self, query: &str) -> String {
        let mut system_prompt = format!("{}\n\n{}", self.template.system_prompt, CLARIFY_INSTRUCTION);
        if Self::seems_uncertain(query) {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(MENU_INSTRUCTION);
        }

        match self.chat(&system_prompt, query, true).await {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "model call failed on unmatched query");
                APOLOGY.to_string()
            }
        }
    }

    async fn narrate(&self, guide: &str) -> Result<String> {
        let system_prompt = format!("{}\n\n{}", self.template.system_prompt, VERBATIM_INSTRUCTION);
        self.chat(&system_prompt, guide, false).await
    }

    /// One bounded, non-streaming chat completion. No retries.
    async fn chat(&self, system_prompt: &str, user_content: &str, with_history: bool) -> Result<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(
                        system_prompt.to_string(),
                    ),
                    name: None,
                },
            )];
        messages.extend(self.template.messages.iter().cloned());
        if with_history {
            messages.extend(self.history.lock().await.as_messages());
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(
                    self.template.decorate_user_content(user_content),
                ),
                name: None,
            },
        ));

        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(self.config.max_tokens)
            .temperature(self.config.temperature)
            .model(self.config.model.clone())
            .messages(messages)
            .build()
            .map_err(|e| Error::Completion(e.to_string()))?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| Error::Completion("model returned no content".to_string()))
    }

    fn seems_uncertain(query: &str) -> bool {
        let lower = query.to_lowercase();
        lower.split_whitespace().count() <= 3
            || UNCERTAINTY_MARKERS.iter().any(|m| lower.contains(m))
    }

    /// Embed every stored procedure and build the vector index.
    ///
    /// The replacement index is built completely off to the side — no lock
    /// is held across the embedding calls — and swapped in under one brief
    /// write, so concurrent matches keep using the previous index until the
    /// new one is ready. A procedure whose embedding call fails is skipped
    /// with a warning; keyword matching still covers it.
    pub async fn index_all(&self) -> Result<usize> {
        let (fresh, indexed) = self.build_index().await?;
        *self.index.write().await = fresh;
        Ok(indexed)
    }

    /// Build the index only if it is empty. After a restart with a
    /// persistent index the rehydrated dump is kept as-is; `reload` (the
    /// `reindex` command) forces a rebuild.
    pub async fn ensure_indexed(&self) -> Result<usize> {
        {
            let index = self.index.read().await;
            if !index.is_empty() {
                info!(entries = index.len(), "vector index already populated");
                return Ok(index.len());
            }
        }
        self.index_all().await
    }

    async fn build_index(&self) -> Result<(ProcessIndex, usize)> {
        let embedder = EmbeddingClient::new(
            &self.config.api_base,
            &self.config.api_key,
            &self.config.embedding_model,
            Duration::from_secs(self.config.embed_timeout_secs),
        )?;
        let mut fresh = ProcessIndex::open(embedder, self.config.index_dir.clone(), "procwise");
        // a rehydrated dump would resurrect entries for deleted definitions
        fresh.remove_all();

        let snapshot = self.store.snapshot();
        let mut indexed = 0;
        for (id, procedure) in snapshot.iter() {
            match fresh.upsert(id, &procedure.embedding_text()).await {
                Ok(()) => indexed += 1,
                Err(err) => warn!(process_id = %id, %err, "embedding failed, skipping"),
            }
        }
        fresh.rebuild()?;
        info!(indexed, total = snapshot.len(), "vector index built");
        Ok((fresh, indexed))
    }

    /// Re-read definitions from disk and rebuild the index to match.
    /// Serialized; concurrent matches see the old or new set, never a mix,
    /// and are never blocked on the embedding service.
    pub async fn reload(&self) -> Result<usize> {
        let _guard = self.reload_lock.lock().await;
        let loaded = self.store.reload()?;
        self.index_all().await?;
        Ok(loaded)
    }

    pub async fn reset_history(&self) {
        self.history.lock().await.reset();
    }

    pub fn analytics(&self) -> Option<Arc<StdMutex<AnalyticsStore>>> {
        self.analytics.clone()
    }

    pub fn store(&self) -> &ProcedureStore {
        &self.store
    }
}
