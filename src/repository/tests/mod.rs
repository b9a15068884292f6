mod path_store;
