//! Contract ABI, fixed by the deployed bridge.

use alloy_sol_types::sol;

sol! {
    interface ISequencerInbox {
        event TxBatchAppended(bytes32 batchHash, uint256 size, uint256 l1BlockNumber);

        function appendTxBatch(
            uint256[] calldata contexts,
            uint256[] calldata txLengths,
            uint256 firstL2BlockNumber,
            bytes calldata txBatch
        ) external;

        function getInboxSize() external view returns (uint256);
    }

    interface IRollup {
        event AssertionCreated(
            uint256 assertionID,
            address asserterAddr,
            bytes32 vmHash,
            uint256 inboxSize,
            uint256 parentID
        );

        function createAssertion(bytes32 vmHash, uint256 inboxSize) external;

        function confirmFirstUnresolvedAssertion() external;

        function rejectFirstUnresolvedAssertion(address stakerAddress) external;

        function advanceStake(uint256 assertionID) external;

        function stake(uint256 stakeAmount) external payable;

        function getStaker(address addr)
            external
            view
            returns (bool isStaked, uint256 stakedAmount, uint256 assertionID);

        function getAssertion(uint256 assertionID)
            external
            view
            returns (
                bytes32 vmHash,
                uint256 inboxSize,
                uint256 parentID,
                uint256 proposalTime,
                address asserter
            );

        function requireFirstUnresolvedAssertionIsConfirmable() external view;

        function requireFirstUnresolvedAssertionIsRejectable(address stakerAddress) external view;
    }
}

/// Number of leading calldata bytes that select the method.
pub const SELECTOR_BYTES: usize = 4;
