mod helpers;

mod tests_by_batch;
mod tests_by_block;
