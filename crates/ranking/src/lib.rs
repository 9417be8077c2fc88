pub mod evaluate;
pub mod features;
pub mod rank;
pub mod ranker;
pub mod time_filter;
pub mod training;

pub use evaluate::{Channel, QueryRecall, RecallEvaluator, RecallReport, evaluate_recall};
pub use features::FeaturePipeline;
pub use rank::rank;
pub use ranker::{LinearModel, Ranker, ScoringModel, rank_with_model, train_ranker};
pub use time_filter::TimeFilterStats;
pub use training::{TrainingSet, TrainingStats, build_training_set, split};
