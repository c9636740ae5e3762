pub mod attribution;
pub mod health;
pub mod landing;
pub mod negatives;
pub mod normalize;
pub mod pacing;
pub mod reconcile;
