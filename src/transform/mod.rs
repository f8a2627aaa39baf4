pub mod coalesce;
pub mod cts;
pub mod dce;
pub mod disassociate;
pub mod membar;
pub mod peephole;
pub mod reassociate;
