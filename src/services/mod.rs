pub mod fees;
pub mod order_number;
pub mod order_status;
pub mod orders;
pub mod payment_provider;
pub mod payments;

#[cfg(test)]
pub(crate) mod test_support;
