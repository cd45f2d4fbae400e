//! Sencillo Core: client error taxonomy, request identity, and metric naming.

pub mod context;
pub mod errors;
pub mod identity;
pub mod naming;

pub use context::{RequestContext, TransportKind};
pub use errors::{
    classify, client_facing, is_auth_status, Classified, ClientError, ClientErrorBuilder,
    ClientFacing, ClientFacingError, ClientFacingExt, ErrorMetadata, DEFAULT_ERROR_CODE,
    INTERNAL_ERROR_BODY, INTERNAL_ERROR_STATUS,
};
pub use identity::{subject_to_request_id, IdentityError, RequestId, REQUEST_ID_HEADER};
pub use naming::{metric_name, MetricNames};
