mod counter_test;
mod fan_test;
mod pipeline_test;
mod pool_test;
mod service_test;
