pub mod omtriage_core;
