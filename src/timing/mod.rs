pub mod tempo_map;
pub mod timeline;
