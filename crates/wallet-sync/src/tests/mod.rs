mod cache_tests;
mod indexer_tests;
