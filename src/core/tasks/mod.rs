// src/core/tasks/mod.rs

//! This module contains the long-running background tasks that drive delivery
//! without a client request, such as the class reminder scan.

pub mod class_reminder;
