//! Hard caps on input sizes. Anything above these is rejected with
//! `EngineError::LimitExceeded` before any state is touched.

pub const MAX_RESOURCES: usize = 50_000;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 1_000_000;
pub const MAX_REQUESTS: usize = 100_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_LOCATION_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_REASON_LEN: usize = 2_000;

/// Upper bound on units requested by a single booking.
pub const MAX_QUANTITY_PER_BOOKING: u32 = 10_000;
/// Upper bound on `total_quantity` for a resource.
pub const MAX_TOTAL_QUANTITY: u32 = 100_000;
