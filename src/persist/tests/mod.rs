mod tests_kv;
