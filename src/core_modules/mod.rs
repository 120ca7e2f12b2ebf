pub mod background;
pub mod candidate_extractor;
pub mod deduplicator;
pub mod frame;
pub mod frame_source;
pub mod health_monitor;
pub mod pixel;
pub mod sector_grid;
pub mod shot;
pub mod shot_candidate;
pub mod shot_matcher;
pub mod smart_pixel;
pub mod utils;
