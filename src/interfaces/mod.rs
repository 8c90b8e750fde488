//! Ways into the engine from outside: CSV scripts and the replay driver that runs them.
pub mod csv;
pub mod replay;
