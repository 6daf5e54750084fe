//! Engine task loop and handle
//!
//! One task owns the pipeline, the counters, and the CNAME suspension
//! bookkeeping; everything else talks to it through a cheap cloneable
//! [`EngineHandle`] using post-and-reply. List updates and classification
//! are commands on the same queue, so no matcher ever observes a rule set
//! mid-rebuild.
//!
//! CNAME resolution never blocks the loop: a request that needs an alias
//! chain is parked, the lookup runs as its own task, and its completion
//! re-enters the queue as a command that resumes every request waiting on
//! that host. At most one lookup is in flight per (tab, host), and results
//! are cached for the remainder of the tab's navigation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use sg_compiler::TrackerTable;
use sg_core::types::{BlockDecision, CosmeticControl, RequestContext, Verdict};

use crate::pipeline::{CosmeticResources, DecisionPipeline, EngineConfig, PipelineOutcome};
use crate::regional::{CatalogError, ListError};
use crate::resolver::{CnameResolver, Resolution};
use crate::telemetry::{BlockEventSink, BlockedCounters, BlockedEvent, CounterStore};

// =============================================================================
// Commands
// =============================================================================

enum Command {
    Classify {
        ctx: RequestContext,
        reply: oneshot::Sender<BlockDecision>,
    },
    CnameResolved {
        tab_id: i32,
        host: String,
        resolution: Resolution,
    },
    UpdateDefaultRules {
        rules: String,
        resources: String,
        done: oneshot::Sender<()>,
    },
    UpdateCustomRules {
        rules: String,
        done: oneshot::Sender<()>,
    },
    SetTrackerTable {
        table: TrackerTable,
        done: oneshot::Sender<()>,
    },
    SetRegionalCatalog {
        json: String,
        reply: oneshot::Sender<Result<(), CatalogError>>,
    },
    SelectLocale {
        locale: String,
        reply: oneshot::Sender<Option<String>>,
    },
    EnableRegionalList {
        uuid: String,
        enabled: bool,
        reply: oneshot::Sender<Result<(), ListError>>,
    },
    RegionalListReady {
        uuid: String,
        rules: String,
        done: oneshot::Sender<()>,
    },
    EnableTag {
        tag: String,
        enabled: bool,
        done: oneshot::Sender<()>,
    },
    TagExists {
        tag: String,
        reply: oneshot::Sender<bool>,
    },
    DidStartNavigation {
        tab_id: i32,
        done: oneshot::Sender<()>,
    },
    CosmeticResources {
        tab_url: String,
        control: CosmeticControl,
        reply: oneshot::Sender<CosmeticResources>,
    },
    Counters {
        reply: oneshot::Sender<(u64, u64)>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Cheap cloneable front door to the engine task. All calls are async
/// post-and-reply; a dead engine fails open (allow, defaults).
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

/// Spawn the engine task onto the current tokio runtime.
pub fn spawn(
    config: EngineConfig,
    resolver: Arc<dyn CnameResolver>,
    store: Box<dyn CounterStore>,
    sink: Box<dyn BlockEventSink>,
) -> EngineHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = EngineTask {
        pipeline: DecisionPipeline::new(config),
        counters: BlockedCounters::new(store),
        sink,
        resolver,
        cname_cache: HashMap::new(),
        in_flight: HashMap::new(),
        tx: tx.clone(),
    };
    tokio::spawn(task.run(rx));
    EngineHandle { tx }
}

impl EngineHandle {
    /// Classify one request. Fails open to allow if the engine is gone.
    pub async fn classify(&self, ctx: RequestContext) -> BlockDecision {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Classify { ctx, reply }).is_err() {
            return BlockDecision::allow();
        }
        rx.await.unwrap_or_else(|_| BlockDecision::allow())
    }

    pub async fn update_default_rules(&self, rules: &str, resources: &str) {
        let (done, rx) = oneshot::channel();
        let _ = self.tx.send(Command::UpdateDefaultRules {
            rules: rules.to_string(),
            resources: resources.to_string(),
            done,
        });
        let _ = rx.await;
    }

    pub async fn update_custom_rules(&self, rules: &str) {
        let (done, rx) = oneshot::channel();
        let _ = self.tx.send(Command::UpdateCustomRules {
            rules: rules.to_string(),
            done,
        });
        let _ = rx.await;
    }

    pub async fn set_tracker_table(&self, table: TrackerTable) {
        let (done, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SetTrackerTable { table, done });
        let _ = rx.await;
    }

    pub async fn set_regional_catalog(&self, json: &str) -> Result<(), CatalogError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SetRegionalCatalog {
            json: json.to_string(),
            reply,
        });
        rx.await.unwrap_or(Ok(()))
    }

    /// Returns the UUID of the list auto-selected for the locale, if any.
    pub async fn select_locale(&self, locale: &str) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SelectLocale {
            locale: locale.to_string(),
            reply,
        });
        rx.await.unwrap_or(None)
    }

    pub async fn enable_regional_list(&self, uuid: &str, enabled: bool) -> Result<(), ListError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::EnableRegionalList {
            uuid: uuid.to_string(),
            enabled,
            reply,
        });
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn regional_list_ready(&self, uuid: &str, rules: &str) {
        let (done, rx) = oneshot::channel();
        let _ = self.tx.send(Command::RegionalListReady {
            uuid: uuid.to_string(),
            rules: rules.to_string(),
            done,
        });
        let _ = rx.await;
    }

    pub async fn enable_tag(&self, tag: &str, enabled: bool) {
        let (done, rx) = oneshot::channel();
        let _ = self.tx.send(Command::EnableTag {
            tag: tag.to_string(),
            enabled,
            done,
        });
        let _ = rx.await;
    }

    pub async fn tag_exists(&self, tag: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::TagExists {
            tag: tag.to_string(),
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// A new navigation committed in the tab: resets the counting de-dup
    /// scope and the per-navigation CNAME cache.
    pub async fn did_start_navigation(&self, tab_id: i32) {
        let (done, rx) = oneshot::channel();
        let _ = self.tx.send(Command::DidStartNavigation { tab_id, done });
        let _ = rx.await;
    }

    pub async fn cosmetic_resources(
        &self,
        tab_url: &str,
        control: CosmeticControl,
    ) -> CosmeticResources {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::CosmeticResources {
            tab_url: tab_url.to_string(),
            control,
            reply,
        });
        rx.await.unwrap_or_default()
    }

    /// (ads blocked, trackers blocked)
    pub async fn counters(&self) -> (u64, u64) {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Counters { reply });
        rx.await.unwrap_or((0, 0))
    }
}

// =============================================================================
// Task
// =============================================================================

type Waiters = Vec<(RequestContext, oneshot::Sender<BlockDecision>)>;

struct EngineTask {
    pipeline: DecisionPipeline,
    counters: BlockedCounters,
    sink: Box<dyn BlockEventSink>,
    resolver: Arc<dyn CnameResolver>,
    /// tab id -> host -> resolution, valid for the tab's current navigation
    cname_cache: HashMap<i32, HashMap<String, Resolution>>,
    /// tab id -> host -> requests parked on the in-flight lookup
    in_flight: HashMap<i32, HashMap<String, Waiters>>,
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Classify { ctx, reply } => self.handle_classify(ctx, reply),
            Command::CnameResolved {
                tab_id,
                host,
                resolution,
            } => self.handle_resolved(tab_id, host, resolution),
            Command::UpdateDefaultRules {
                rules,
                resources,
                done,
            } => {
                self.pipeline.update_default_rules(&rules, &resources);
                let _ = done.send(());
            }
            Command::UpdateCustomRules { rules, done } => {
                self.pipeline.update_custom_rules(&rules);
                let _ = done.send(());
            }
            Command::SetTrackerTable { table, done } => {
                self.pipeline.set_tracker_table(table);
                let _ = done.send(());
            }
            Command::SetRegionalCatalog { json, reply } => {
                let _ = reply.send(self.pipeline.set_regional_catalog(&json));
            }
            Command::SelectLocale { locale, reply } => {
                let _ = reply.send(self.pipeline.select_locale(&locale));
            }
            Command::EnableRegionalList {
                uuid,
                enabled,
                reply,
            } => {
                let _ = reply.send(self.pipeline.enable_regional_list(&uuid, enabled));
            }
            Command::RegionalListReady { uuid, rules, done } => {
                self.pipeline.regional_list_ready(&uuid, &rules);
                let _ = done.send(());
            }
            Command::EnableTag { tag, enabled, done } => {
                self.pipeline.enable_tag(&tag, enabled);
                let _ = done.send(());
            }
            Command::TagExists { tag, reply } => {
                let _ = reply.send(self.pipeline.tag_exists(&tag));
            }
            Command::DidStartNavigation { tab_id, done } => {
                self.counters.reset_navigation(tab_id);
                self.cname_cache.remove(&tab_id);
                let _ = done.send(());
            }
            Command::CosmeticResources {
                tab_url,
                control,
                reply,
            } => {
                let _ = reply.send(self.pipeline.cosmetic_resources(&tab_url, control));
            }
            Command::Counters { reply } => {
                let _ = reply.send((self.counters.ads_blocked(), self.counters.trackers_blocked()));
            }
        }
    }

    fn handle_classify(&mut self, ctx: RequestContext, reply: oneshot::Sender<BlockDecision>) {
        match self.pipeline.classify_start(&ctx) {
            PipelineOutcome::Final(decision) => self.finish(ctx, decision, reply),
            PipelineOutcome::NeedsCname { host } => {
                let tab_id = ctx.tab_id;

                // Resolution already cached for this navigation?
                if let Some(resolution) = self
                    .cname_cache
                    .get(&tab_id)
                    .and_then(|hosts| hosts.get(&host))
                    .cloned()
                {
                    let decision = self.pipeline.classify_resume(&ctx, &resolution);
                    self.finish(ctx, decision, reply);
                    return;
                }

                // Lookup already in flight: park alongside it.
                let hosts = self.in_flight.entry(tab_id).or_default();
                if let Some(waiters) = hosts.get_mut(&host) {
                    waiters.push((ctx, reply));
                    return;
                }
                hosts.insert(host.clone(), vec![(ctx, reply)]);

                let future = self.resolver.resolve(&host);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let resolution = future.await;
                    let _ = tx.send(Command::CnameResolved {
                        tab_id,
                        host,
                        resolution,
                    });
                });
            }
        }
    }

    fn handle_resolved(&mut self, tab_id: i32, host: String, resolution: Resolution) {
        self.cname_cache
            .entry(tab_id)
            .or_default()
            .insert(host.clone(), resolution.clone());

        let waiters = self
            .in_flight
            .get_mut(&tab_id)
            .and_then(|hosts| hosts.remove(&host))
            .unwrap_or_default();

        for (ctx, reply) in waiters {
            let decision = self.pipeline.classify_resume(&ctx, &resolution);
            self.finish(ctx, decision, reply);
        }
    }

    fn finish(
        &mut self,
        ctx: RequestContext,
        decision: BlockDecision,
        reply: oneshot::Sender<BlockDecision>,
    ) {
        if decision.should_count && !matches!(decision.verdict, Verdict::Allow) {
            if let Some(category) = decision.category {
                if self.counters.record(ctx.tab_id, &ctx.url, category) {
                    self.sink.on_blocked(BlockedEvent {
                        url: ctx.url.clone(),
                        tab_id: ctx.tab_id,
                        frame_id: ctx.frame_id,
                        category,
                        rule: decision.matched_rule.clone(),
                    });
                }
            }
        }
        let _ = reply.send(decision);
    }
}
