/// Internal modules for the mempool-flow library.
/// These are implementation details and should not be used directly by library consumers.
pub(crate) mod fee_calculator;

pub(crate) use fee_calculator::FeeCalculator;
