//! Log entry test suite
