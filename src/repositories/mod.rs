pub mod order_repository;
