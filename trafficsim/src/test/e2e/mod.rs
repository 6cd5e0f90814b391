mod runtime;

mod test_backend;
mod test_generator;
