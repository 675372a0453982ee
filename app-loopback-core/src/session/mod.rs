pub mod activation;
pub mod loopback;
pub(crate) mod pump;

#[cfg(test)]
pub(crate) mod mock;
