/// Daily rate derivation and the point economy derived from it.
pub mod rate;
/// Core score records shared by every layer.
pub mod score;
