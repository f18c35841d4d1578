//! CLI subcommands.

#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod inspect;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod install;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod keygen;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod sign;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod verify;
