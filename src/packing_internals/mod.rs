pub mod binary_fuse_filter;
pub mod branch_opt_util;
pub mod error;
pub mod params;
pub mod probe;
pub mod tag_codec;
