mod multisig_operation_tests;
mod signing_tests;
