mod tests_query;
mod tests_tree;
