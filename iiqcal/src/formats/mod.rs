// SPDX-License-Identifier: LGPL-2.1

pub mod calib;
pub mod cursor;
pub mod iiq;
