mod tests_deferred;
