tonic::include_proto!("mixnet");
