mod tests_query;
