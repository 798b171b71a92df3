pub mod cfg;
pub mod dsv;
pub mod str;
pub mod util;
