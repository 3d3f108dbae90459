pub mod match_response;
pub mod post_request;
pub mod post_response;

pub use match_response::{MatchResponse, ScoreBreakdownResponse};
pub use post_request::PostRequest;
pub use post_response::PostResponse;
