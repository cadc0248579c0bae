//! Core data model: patches, stacks, trees and conflicts.

pub mod conflict;
pub mod patch;
pub mod stack;
pub mod tree;
