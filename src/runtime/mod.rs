//! API surface over the scheduler.

pub mod api;

pub use api::{
    ApiResult, BatchDetailResponse, ErrorResponse, ListBatchesQuery, ListBatchesResponse, ProgressResponse,
    SubmitBatchRequest, SubmitBatchResponse,
};
