mod rpc_tests;
