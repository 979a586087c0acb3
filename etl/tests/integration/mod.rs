mod cancellation_test;
mod pipeline_test;
mod postgres_destination_test;
