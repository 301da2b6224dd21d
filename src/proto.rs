pub mod v1 {
    tonic::include_proto!("reverse_swap.v1");
}
