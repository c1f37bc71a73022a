//! Service graph
//!
//! Builds every engine service once, in dependency order, from an already
//! loaded configuration and already constructed clients. Construction happens
//! only here and in `main`, never at module load.

use std::sync::Arc;

use engram_core::{
    BudgetMonitor, Embedder, EngramConfig, Evaluator, FallbackController, GoldenRunner,
    GraphService, HybridSearcher, IrrValidator, Judge, MemoryTiers, MultiQueryRetriever,
    SearchWeights, Store,
};

/// Shared handles to the assembled engine.
pub struct Services {
    pub config: EngramConfig,
    pub store: Store,
    pub embedder: Arc<dyn Embedder>,
    pub judge: Arc<dyn Judge>,
    pub tiers: Arc<MemoryTiers>,
    pub hybrid: Arc<HybridSearcher>,
    pub retriever: Arc<MultiQueryRetriever>,
    pub graph: Arc<GraphService>,
    pub fallback: Arc<FallbackController>,
    pub evaluator: Arc<Evaluator>,
    pub validator: Arc<IrrValidator>,
    pub golden: Arc<GoldenRunner>,
    pub budget: Arc<BudgetMonitor>,
    pub default_weights: SearchWeights,
}

impl Services {
    /// Wire the service graph bottom-up over the shared store and clients.
    pub fn assemble(
        config: EngramConfig,
        store: Store,
        embedder: Arc<dyn Embedder>,
        judge: Arc<dyn Judge>,
    ) -> anyhow::Result<Arc<Self>> {
        let default_weights = SearchWeights::from_config(&config.retrieval)?;

        let tiers = Arc::new(MemoryTiers::new(store.clone(), embedder.clone(), &config));
        let hybrid = Arc::new(HybridSearcher::new(
            store.clone(),
            embedder.clone(),
            &config.retrieval,
        ));
        let retriever = Arc::new(MultiQueryRetriever::new(
            hybrid.clone(),
            embedder.clone(),
            &config.retrieval,
        ));
        let graph = Arc::new(GraphService::new(store.clone(), config.graph.clone()));
        let fallback = Arc::new(FallbackController::new(store.clone()));
        let evaluator = Arc::new(Evaluator::new(
            judge.clone(),
            fallback.clone(),
            tiers.clone(),
            store.clone(),
            &config,
        ));
        let validator = Arc::new(IrrValidator::new(store.clone()));
        let golden = Arc::new(GoldenRunner::new(store.clone(), hybrid.clone(), default_weights));
        let budget = Arc::new(BudgetMonitor::new(store.clone(), &config.budget));

        Ok(Arc::new(Self {
            config,
            store,
            embedder,
            judge,
            tiers,
            hybrid,
            retriever,
            graph,
            fallback,
            evaluator,
            validator,
            golden,
            budget,
            default_weights,
        }))
    }
}
