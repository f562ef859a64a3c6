/*!
 * Thread Parking
 *
 * Bucketed wait-queue table keyed by lock identity. This is the blocking
 * substrate every higher-level primitive in this crate is built on: locks
 * park here instead of owning one OS synchronization object each.
 */

mod table;

pub use table::{table, ParkResult, ParkingTable, UnparkSummary, UnparkToken};
