//! File manager test suite
