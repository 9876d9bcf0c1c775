pub mod account;
pub mod confirmation;
pub mod refresh_token;

pub use account::Account;
pub use confirmation::{Confirmation, Purpose};
pub use refresh_token::RefreshToken;
