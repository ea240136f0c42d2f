pub mod collision;
pub mod config;
pub mod fec;
pub mod lattice;
pub mod medium;
pub mod microtubule;
pub mod molecule;
pub mod movement;
pub mod nanomachine;
pub mod simulation;
pub mod stats;
pub mod view;
